pub mod helpers;

mod client_tests;
