crate::system_test_cases!({
    args: &["-j", "2", "all"],
    expected_stdout: "?",
    expected_stderr: "",
    expected_files: &[("a.o", "cc a\n"), ("b.o", "stale b\n"), ("link.out", "link\n")],
    pre_hook: {
        let dir = "tests/scenarios/engine_features/s2_staleness";
        std::fs::write(format!("{dir}/a.o"), "stale a\n").unwrap();
        std::fs::write(format!("{dir}/b.o"), "stale b\n").unwrap();
        std::fs::write(format!("{dir}/link.out"), "stale link\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        std::fs::write(format!("{dir}/a.c"), "int a2;\n").unwrap();
    },
});
