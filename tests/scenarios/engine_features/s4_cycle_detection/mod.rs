crate::system_test_cases!({
    args: &["a"],
    expected_stdout: "",
    expected_stderr: "?",
    expected_files: &[],
    expected_code: 2,
});
