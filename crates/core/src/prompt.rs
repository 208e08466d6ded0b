//! Positive prompt assembly from scene data.
//!
//! The dialogue backend returns a `visual_prompt` and a `background` for
//! each turn; the character sheet provides `appearance` and `age`.

/// Inputs for one portrait prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenePrompt {
    pub appearance: String,
    pub age: u32,
    pub visual_prompt: String,
    pub background: String,
    pub emotion: String,
}

impl ScenePrompt {
    /// `"{appearance}, {visual}"`, where `appearance` is prefixed with the
    /// age tag unless it already mentions it.
    pub fn assemble(&self) -> String {
        let appearance = self.appearance_with_age();
        let visual = self.visual_with_background();
        if appearance.is_empty() {
            visual
        } else {
            format!("{appearance}, {visual}")
        }
    }

    fn appearance_with_age(&self) -> String {
        let age_tag = format!("{} years old", self.age);
        let appearance = self.appearance.trim();
        if appearance.is_empty() {
            age_tag
        } else if appearance.to_lowercase().contains(&age_tag) {
            appearance.to_string()
        } else {
            format!("{age_tag}, {appearance}")
        }
    }

    fn visual_with_background(&self) -> String {
        let visual = self.visual_prompt.trim();
        let background = self.background.trim();

        if visual.is_empty() {
            return format!(
                "background: {background}, expression: {}, looking at viewer",
                self.emotion.trim()
            );
        }
        if !background.is_empty() && !visual.to_lowercase().contains("background:") {
            return format!("{visual}, background: {background}");
        }
        visual.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> ScenePrompt {
        ScenePrompt {
            appearance: "long black hair, brown eyes".into(),
            age: 21,
            visual_prompt: "smiling, holding a coffee cup".into(),
            background: "cafe".into(),
            emotion: "happy".into(),
        }
    }

    #[test]
    fn prefixes_age_and_appends_background() {
        assert_eq!(
            scene().assemble(),
            "21 years old, long black hair, brown eyes, smiling, holding a coffee cup, background: cafe"
        );
    }

    #[test]
    fn age_not_duplicated() {
        let mut s = scene();
        s.appearance = "21 Years Old, long black hair".into();
        assert!(s.assemble().starts_with("21 Years Old, long black hair, smiling"));
    }

    #[test]
    fn empty_visual_prompt_falls_back_to_background_and_emotion() {
        let mut s = scene();
        s.visual_prompt.clear();
        assert_eq!(
            s.assemble(),
            "21 years old, long black hair, brown eyes, background: cafe, expression: happy, looking at viewer"
        );
    }

    #[test]
    fn background_already_present_is_kept_once() {
        let mut s = scene();
        s.visual_prompt = "waving, background: park".into();
        assert!(s.assemble().ends_with("waving, background: park"));
    }

    #[test]
    fn empty_appearance_uses_age_only() {
        let mut s = scene();
        s.appearance.clear();
        assert!(s.assemble().starts_with("21 years old, smiling"));
    }
}
