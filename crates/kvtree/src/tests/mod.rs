mod helpers;

mod read_tests;
mod recovery_tests;
