pub mod gemini;
pub mod ollama;

pub use gemini::GeminiGenerator;
pub use ollama::OllamaGenerator;

pub const SAFETY_REFUSAL_MESSAGE: &str = "The answer was blocked by the model's safety settings.";
