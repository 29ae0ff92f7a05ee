use std::path::PathBuf;

/// Reference documents shipped alongside the skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Document {
    /// `prose.md`: how the agent should behave as the OpenProse VM.
    VmSemantics,
    /// `SKILL.md`: the skill guide.
    SkillGuide,
    /// `docs.md`: the language specification.
    LanguageSpec,
}

impl Document {
    pub fn file_name(self) -> &'static str {
        match self {
            Document::VmSemantics => "prose.md",
            Document::SkillGuide => "SKILL.md",
            Document::LanguageSpec => "docs.md",
        }
    }
}

/// Reads reference documents from the skills directory.
///
/// Reads never fail. A missing or unreadable document comes back as `""`, and
/// callers omit that section.
pub struct DocumentLoader {
    skills_dir: PathBuf,
}

impl DocumentLoader {
    pub fn new(skills_dir: PathBuf) -> Self {
        Self { skills_dir }
    }

    pub async fn load(&self, document: Document) -> String {
        self.read(document.file_name()).await
    }

    pub async fn read(&self, file_name: &str) -> String {
        let path = self.skills_dir.join(file_name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Reference document unavailable");
                String::new()
            }
        }
    }
}
