use clap::Parser;

use crate::llm::chat::openai::DEFAULT_CHAT_ENDPOINT;
use crate::llm::image::DEFAULT_IMAGE_ENDPOINT;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Chat Endpoint Args ---
    /// OpenAI-compatible chat completion endpoint
    #[arg(long, env = "CHAT_ENDPOINT", default_value = DEFAULT_CHAT_ENDPOINT)]
    pub chat_endpoint: String,

    /// API key for the chat endpoint
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model used for text-only submissions unless another one is selected
    #[arg(long, env = "CHAT_MODEL", default_value = "gpt-4o-mini")]
    pub chat_model: String,

    /// Image-capable model used whenever the user attaches an image
    #[arg(long, env = "VISION_MODEL", default_value = "gpt-4o")]
    pub vision_model: String,

    /// Sampling temperature sent with every chat request
    #[arg(long, env = "TEMPERATURE", default_value = "0.7")]
    pub temperature: f32,

    /// Token budget for ordinary chat replies
    #[arg(long, env = "CHAT_MAX_TOKENS", default_value = "1000")]
    pub chat_max_tokens: u32,

    /// Token budget for essay replies
    #[arg(long, env = "ESSAY_MAX_TOKENS", default_value = "2000")]
    pub essay_max_tokens: u32,

    /// Essay replies longer than this many characters are shown as one long-form entry
    #[arg(long, env = "ESSAY_THRESHOLD", default_value = "1000")]
    pub essay_threshold: usize,

    /// What the essay threshold measures: prose (after removing code fences) or raw
    #[arg(long, env = "ESSAY_LENGTH_BASIS", default_value = "prose")]
    pub essay_length_basis: String,

    // --- Image Endpoint Args ---
    /// Image generation endpoint; accepts {"prompt": ...} and returns image bytes
    #[arg(long, env = "IMAGE_ENDPOINT", default_value = DEFAULT_IMAGE_ENDPOINT)]
    pub image_endpoint: String,

    /// API key for the image endpoint
    #[arg(long, env = "IMAGE_API_KEY", default_value = "")]
    pub image_api_key: String,

    /// Model id recorded in usage counters for image generation
    #[arg(long, env = "IMAGE_MODEL", default_value = "stable-diffusion")]
    pub image_model: String,

    /// Caption attached to generated images
    #[arg(long, env = "IMAGE_CAPTION", default_value = "Here is your generated image:")]
    pub image_caption: String,

    // --- Progress Args ---
    /// Interval between simulated progress ticks, in milliseconds
    #[arg(long, env = "PROGRESS_TICK_MS", default_value = "500")]
    pub progress_tick_ms: u64,

    /// Largest random increment per progress tick
    #[arg(long, env = "PROGRESS_MAX_STEP", default_value = "10")]
    pub progress_max_step: u8,

    /// Highest simulated progress value while an image is pending (must be below 90)
    #[arg(long, env = "PROGRESS_CEILING", default_value = "89")]
    pub progress_ceiling: u8,

    // --- History Store Args ---
    /// Conversation store type (memory, redis)
    #[arg(long, env = "HISTORY_TYPE", default_value = "memory")]
    pub history_type: String,

    /// Conversation store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis conversation keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "chat:")]
    pub history_redis_prefix: String,

    // --- General App Args ---
    /// User owning the conversations created in this session
    #[arg(long, env = "USER_ID", default_value = "local")]
    pub user_id: String,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
