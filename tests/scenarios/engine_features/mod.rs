mod s1_parallel_build;
mod s2_staleness;
mod s4_cycle_detection;
mod s5_keep_going;
mod s6_cli_override;
