crate::system_test_cases!(
    {
        args: &[],
        expected_stdout: "echo cc x.c\ncc x.c\n",
        expected_stderr: "",
        expected_files: &[],
    },
    {
        args: &["CC=gcc"],
        expected_stdout: "echo gcc x.c\ngcc x.c\n",
        expected_stderr: "",
        expected_files: &[],
    },
);
