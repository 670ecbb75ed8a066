crate::system_test_cases!(
    {
        args: &["-j", "1", "all"],
        expected_stdout: "exit 1\n",
        expected_stderr: "?",
        expected_files: &[],
        expected_code: 2,
    },
    {
        args: &["-j", "1", "-k", "all"],
        expected_stdout: "exit 1\necho ok\nok\n",
        expected_stderr: "?",
        expected_files: &[],
        expected_code: 2,
    },
);
