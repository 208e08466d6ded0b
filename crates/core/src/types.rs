/// Server-assigned correlation id for a queued job (ComfyUI `prompt_id`).
pub type PromptId = String;
