pub mod session_runner;
