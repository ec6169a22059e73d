pub mod db;
pub mod pptx;
pub mod telegram;
pub mod text_llm;
