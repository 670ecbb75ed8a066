mod t2_prereq;
