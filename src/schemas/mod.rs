pub mod answer;
pub mod attempt;
pub mod auth;
pub mod exam;
pub mod question;
