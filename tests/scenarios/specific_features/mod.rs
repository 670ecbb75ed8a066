mod t2_always_make;
mod t3_old_files;
mod t4_just_print;
