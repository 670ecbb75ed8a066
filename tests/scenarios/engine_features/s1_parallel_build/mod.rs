crate::system_test_cases!({
    args: &["-j", "2", "all"],
    expected_stdout: "?",
    expected_stderr: "",
    expected_files: &[("a.o", "cc a\n"), ("b.o", "cc b\n"), ("link.out", "link\n")],
});
