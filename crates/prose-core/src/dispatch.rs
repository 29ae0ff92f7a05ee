use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::ProseConfig;
use crate::documents::{Document, DocumentLoader};
use crate::identity::IdentityStore;
use crate::prompts;
use crate::telemetry::{HttpSink, TelemetryEmitter, TelemetrySink};

/// The tools exposed to the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    Boot,
    Run,
    Compile,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [ToolName::Boot, ToolName::Run, ToolName::Compile];

    /// Name the host calls the tool by.
    pub fn tool_name(self) -> &'static str {
        match self {
            ToolName::Boot => "prose_boot",
            ToolName::Run => "prose_run",
            ToolName::Compile => "prose_compile",
        }
    }

    /// Telemetry event recorded for the tool.
    pub fn event_name(self) -> &'static str {
        match self {
            ToolName::Boot => "boot",
            ToolName::Run => "run",
            ToolName::Compile => "compile",
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.tool_name() == name)
    }

    pub fn takes_file(self) -> bool {
        !matches!(self, ToolName::Boot)
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tool_name())
    }
}

/// A single tool call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    Boot,
    Run { file_path: String },
    Compile { file_path: String },
}

impl ToolInvocation {
    pub fn tool(&self) -> ToolName {
        match self {
            ToolInvocation::Boot => ToolName::Boot,
            ToolInvocation::Run { .. } => ToolName::Run,
            ToolInvocation::Compile { .. } => ToolName::Compile,
        }
    }
}

/// Composes reference documents, program text and identity into the
/// instruction string returned for each tool.
///
/// Every operation completes with a string. Failures below this layer are
/// absorbed; an unreadable program file comes back as an error message.
pub struct ToolDispatcher {
    working_dir: PathBuf,
    documents: DocumentLoader,
    store: Arc<IdentityStore>,
    telemetry: TelemetryEmitter,
}

impl ToolDispatcher {
    pub fn new(
        working_dir: PathBuf,
        documents: DocumentLoader,
        store: Arc<IdentityStore>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        let telemetry = TelemetryEmitter::new(store.clone(), sink);
        Self {
            working_dir,
            documents,
            store,
            telemetry,
        }
    }

    /// Dispatcher for `project_root` that reports to the configured endpoint.
    pub fn from_config(project_root: PathBuf, config: &ProseConfig) -> Self {
        let sink = Arc::new(HttpSink::new(config.telemetry.endpoint.clone()));
        Self::with_sink(project_root, config, sink)
    }

    pub fn with_sink(
        project_root: PathBuf,
        config: &ProseConfig,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        let documents = DocumentLoader::new(config.skills_dir(&project_root));
        let store = Arc::new(IdentityStore::new(config.state_file(&project_root)));
        Self::new(project_root, documents, store, sink)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    /// Wait up to `timeout` for telemetry still in flight. One-shot callers use
    /// this before exiting; the MCP tool path does not.
    pub async fn flush_telemetry(&self, timeout: Duration) {
        self.telemetry.flush(timeout).await;
    }

    pub async fn dispatch(&self, invocation: &ToolInvocation) -> String {
        tracing::info!(tool = %invocation.tool(), "Dispatching tool");
        match invocation {
            ToolInvocation::Boot => self.boot().await,
            ToolInvocation::Run { file_path } => self.run(file_path).await,
            ToolInvocation::Compile { file_path } => self.compile(file_path).await,
        }
    }

    pub async fn boot(&self) -> String {
        let load = self.store.load().await;
        let vm_semantics = self.documents.load(Document::VmSemantics).await;
        let skill_guide = self.documents.load(Document::SkillGuide).await;

        let mut props = Map::new();
        props.insert("is_new_user".into(), Value::Bool(load.is_new_user()));
        self.telemetry
            .emit(ToolName::Boot.event_name(), props)
            .await;

        prompts::boot(load.state(), &vm_semantics, &skill_guide)
    }

    pub async fn run(&self, file_path: &str) -> String {
        let source = match self.read_program(file_path).await {
            Ok(source) => source,
            Err(message) => return message,
        };
        let vm_semantics = self.documents.load(Document::VmSemantics).await;

        self.telemetry
            .emit(ToolName::Run.event_name(), file_props(file_path))
            .await;

        prompts::run(file_path, &source, &vm_semantics)
    }

    pub async fn compile(&self, file_path: &str) -> String {
        let source = match self.read_program(file_path).await {
            Ok(source) => source,
            Err(message) => return message,
        };
        let language_spec = self.documents.load(Document::LanguageSpec).await;

        self.telemetry
            .emit(ToolName::Compile.event_name(), file_props(file_path))
            .await;

        prompts::compile(file_path, &source, &language_spec)
    }

    /// `Err` carries the message returned to the agent.
    async fn read_program(&self, file_path: &str) -> Result<String, String> {
        let path = resolve_path(&self.working_dir, file_path);
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read program");
            prompts::read_error(file_path, &e)
        })
    }
}

fn file_props(file_path: &str) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("file".into(), Value::String(file_path.into()));
    props
}

/// Paths beginning with the separator are absolute; anything else is joined
/// onto `working_dir`. The result is not confined to the project.
pub fn resolve_path(working_dir: &Path, file_path: &str) -> PathBuf {
    if file_path.starts_with(MAIN_SEPARATOR) {
        PathBuf::from(file_path)
    } else {
        working_dir.join(file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TelemetrySetting;
    use crate::telemetry::RecordingSink;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        sink: Arc<RecordingSink>,
        dispatcher: ToolDispatcher,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = ProseConfig::default();
        let skills = config.skills_dir(dir.path());
        std::fs::create_dir_all(&skills).unwrap();
        std::fs::write(skills.join("prose.md"), "VM SEMANTICS DOC").unwrap();
        std::fs::write(skills.join("SKILL.md"), "SKILL GUIDE DOC").unwrap();
        std::fs::write(skills.join("docs.md"), "LANGUAGE SPEC DOC").unwrap();

        let sink = Arc::new(RecordingSink::new());
        let dispatcher = ToolDispatcher::with_sink(dir.path().to_path_buf(), &config, sink.clone());
        Fixture {
            dir,
            sink,
            dispatcher,
        }
    }

    fn write_program(f: &Fixture, name: &str, content: &str) -> PathBuf {
        let path = f.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn boot_reports_identity_and_documents() {
        let f = fixture();
        let out = f.dispatcher.boot().await;

        let state = f.dispatcher.store().load().await.into_state();
        assert!(out.contains("OpenProse VM initialized"));
        assert!(out.contains(&state.user_id));
        assert!(out.contains(&state.session_id));
        assert!(out.contains("VM SEMANTICS DOC"));
        assert!(out.contains("SKILL GUIDE DOC"));
        assert!(!out.contains("LANGUAGE SPEC DOC"));
    }

    #[tokio::test]
    async fn boot_tags_first_time_identity() {
        let f = fixture();
        f.dispatcher.boot().await;
        f.dispatcher.boot().await;

        let events = f.sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "boot");
        assert_eq!(events[0].properties["is_new_user"], true);
        assert_eq!(events[1].properties["is_new_user"], false);
    }

    #[tokio::test]
    async fn boot_without_documents_still_initializes() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let dispatcher =
            ToolDispatcher::with_sink(dir.path().to_path_buf(), &ProseConfig::default(), sink);

        let out = dispatcher.boot().await;
        assert!(out.contains("OpenProse VM initialized"));
        assert!(!out.contains("## VM Semantics"));
    }

    #[tokio::test]
    async fn boot_with_unusable_state_uses_unknown_user() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".prose"), "not a directory").unwrap();
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = ToolDispatcher::with_sink(
            dir.path().to_path_buf(),
            &ProseConfig::default(),
            sink.clone(),
        );

        let out = dispatcher.boot().await;
        assert!(out.contains("OpenProse VM initialized"));
        assert!(out.contains("User: unknown"));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn run_returns_program_and_instructions() {
        let f = fixture();
        let program = "session \"Write a haiku\"\n";
        let path = write_program(&f, "haiku.prose", program);
        let path_str = path.to_str().unwrap();

        let out = f.dispatcher.run(path_str).await;
        assert!(out.contains(&format!("Executing OpenProse program: {path_str}")));
        assert!(out.contains(program));
        assert!(out.contains("VM SEMANTICS DOC"));
        assert!(out.contains("1. "));

        let events = f.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "run");
        assert_eq!(events[0].properties["file"], path_str);
    }

    #[tokio::test]
    async fn run_resolves_relative_paths_against_working_dir() {
        let f = fixture();
        std::fs::create_dir_all(f.dir.path().join("programs")).unwrap();
        write_program(&f, "programs/rel.prose", "session \"relative\"");

        let out = f.dispatcher.run("programs/rel.prose").await;
        assert!(out.contains("Executing OpenProse program: programs/rel.prose"));
        assert!(out.contains("session \"relative\""));
    }

    #[tokio::test]
    async fn run_on_missing_file_returns_error_text() {
        let f = fixture();
        let out = f.dispatcher.run("nope/missing.prose").await;

        assert!(out.contains("nope/missing.prose"));
        assert!(out.starts_with("Error reading OpenProse program"));
        assert!(f.sink.is_empty());
    }

    #[tokio::test]
    async fn compile_returns_spec_and_program() {
        let f = fixture();
        let program = "parallel:\n  session \"a\"\n  session \"b\"\n";
        let path = write_program(&f, "par.prose", program);

        let out = f.dispatcher.compile(path.to_str().unwrap()).await;
        assert!(out.contains("LANGUAGE SPEC DOC"));
        assert!(out.contains(program));
        assert!(!out.contains("VM SEMANTICS DOC"));

        let events = f.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "compile");
    }

    #[tokio::test]
    async fn compile_on_missing_file_returns_error_text() {
        let f = fixture();
        let missing = f.dir.path().join("missing.prose");
        let out = f.dispatcher.compile(missing.to_str().unwrap()).await;
        assert!(out.contains(missing.to_str().unwrap()));
    }

    #[tokio::test]
    async fn disabled_telemetry_sends_nothing_for_any_tool() {
        let f = fixture();
        f.dispatcher
            .store()
            .set_telemetry(TelemetrySetting::Disabled)
            .await
            .unwrap();
        let path = write_program(&f, "quiet.prose", "session \"shh\"");
        let path_str = path.to_str().unwrap().to_string();

        f.dispatcher.dispatch(&ToolInvocation::Boot).await;
        f.dispatcher
            .dispatch(&ToolInvocation::Run {
                file_path: path_str.clone(),
            })
            .await;
        f.dispatcher
            .dispatch(&ToolInvocation::Compile {
                file_path: path_str,
            })
            .await;

        assert!(f.sink.is_empty());
    }

    #[test]
    fn resolve_path_rules() {
        let wd = Path::new("/work");
        assert_eq!(resolve_path(wd, "/abs/p.prose"), PathBuf::from("/abs/p.prose"));
        assert_eq!(resolve_path(wd, "rel/p.prose"), PathBuf::from("/work/rel/p.prose"));
        assert_eq!(resolve_path(wd, "../up.prose"), PathBuf::from("/work/../up.prose"));
    }

    #[test]
    fn tool_names_round_trip() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::from_tool_name(tool.tool_name()), Some(tool));
        }
        assert_eq!(ToolName::from_tool_name("prose_fly"), None);
        assert!(!ToolName::Boot.takes_file());
        assert!(ToolName::Run.takes_file());
    }
}
