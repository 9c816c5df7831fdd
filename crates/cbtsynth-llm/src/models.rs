/// Limits of a chat-completions model.
#[derive(Clone, Debug)]
pub struct ModelInfo {
    pub name: &'static str,
    pub context_window: usize,
    pub max_output: u32,
    pub supports_json_mode: bool,
}

pub static GPT_4O_MINI: ModelInfo = ModelInfo {
    name: "gpt-4o-mini",
    context_window: 128_000,
    max_output: 16_384,
    supports_json_mode: true,
};

pub static GPT_4O: ModelInfo = ModelInfo {
    name: "gpt-4o",
    context_window: 128_000,
    max_output: 16_384,
    supports_json_mode: true,
};

pub static GPT_4_1: ModelInfo = ModelInfo {
    name: "gpt-4.1",
    context_window: 1_047_576,
    max_output: 32_768,
    supports_json_mode: true,
};

pub static GPT_4_1_MINI: ModelInfo = ModelInfo {
    name: "gpt-4.1-mini",
    context_window: 1_047_576,
    max_output: 32_768,
    supports_json_mode: true,
};

static ALL_MODELS: &[&ModelInfo] = &[&GPT_4O_MINI, &GPT_4O, &GPT_4_1, &GPT_4_1_MINI];

/// Context window assumed for models not in the catalog (self-hosted, proxies).
pub const FALLBACK_CONTEXT_WINDOW: usize = 32_768;

pub fn find_model(name: &str) -> Option<&'static ModelInfo> {
    ALL_MODELS.iter().find(|m| m.name == name).copied()
}

pub fn default_model() -> &'static ModelInfo {
    &GPT_4O_MINI
}

pub fn all_models() -> &'static [&'static ModelInfo] {
    ALL_MODELS
}

pub fn context_window_for(name: &str) -> usize {
    find_model(name).map_or(FALLBACK_CONTEXT_WINDOW, |m| m.context_window)
}

/// Clamp a requested output budget to what the model accepts.
pub fn clamp_max_tokens(name: &str, requested: u32) -> u32 {
    find_model(name).map_or(requested, |m| requested.min(m.max_output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lookup() {
        assert!(find_model("gpt-4o-mini").is_some());
        assert!(find_model("gpt-4.1").is_some());
        assert!(find_model("llama-3-70b").is_none());
        assert_eq!(all_models().len(), 4);
        assert_eq!(default_model().name, "gpt-4o-mini");
    }

    #[test]
    fn unknown_models_use_fallback_window() {
        assert_eq!(context_window_for("local-model"), FALLBACK_CONTEXT_WINDOW);
        assert_eq!(context_window_for("gpt-4o"), 128_000);
    }

    #[test]
    fn max_tokens_clamped_for_known_models() {
        assert_eq!(clamp_max_tokens("gpt-4o-mini", 50_000), 16_384);
        assert_eq!(clamp_max_tokens("gpt-4o-mini", 6000), 6000);
        assert_eq!(clamp_max_tokens("local-model", 50_000), 50_000);
    }
}
