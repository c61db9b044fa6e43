pub mod answer_buffer;
pub mod attempt_session;
pub mod autosave;
pub mod countdown;
pub mod exam_listing;
pub mod question_renderer;
