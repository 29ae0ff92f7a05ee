//! Response text handed back to the agent for each tool.

use crate::identity::IdentityState;

pub const BOOT_BANNER: &str = "OpenProse VM initialized";
pub const RUN_HEADER: &str = "Executing OpenProse program:";
pub const COMPILE_HEADER: &str = "Compiling OpenProse program:";

const NARRATION_INSTRUCTION: &str = "\
For the rest of this conversation you are the OpenProse VM. Narrate execution \
using the narration protocol from the VM semantics above: announce the \
statement you are at, the variables bound so far, and each statement as it \
completes. Wait for the user to run a program with prose_run.";

const RUN_BEHAVIOURS: [&str; 6] = [
    "Parse the program into its statements, keeping their order and nesting.",
    "Execute each statement in order, following the VM semantics.",
    "For every `session` statement, spawn a sub-session (Task tool) with that prompt and capture its result.",
    "Run the branches of a `parallel` block concurrently and wait for all of them before continuing.",
    "Track program state with the narration protocol after every statement.",
    "Where a condition is marked for discretion (`**...**`), decide it with your own judgment and say what you decided.",
];

const COMPILE_INSTRUCTION: &str = "\
Validate this program against the language specification above. Report every \
syntax error with its line number and the rule it breaks, then any warnings \
(unused bindings, unreachable statements, ambiguous discretion markers). If \
the program is valid, say so and summarise its structure. Do not execute it.";

/// Append a titled section. Empty bodies are skipped.
fn push_section(out: &mut String, title: &str, body: &str) {
    if body.trim().is_empty() {
        tracing::debug!(section = title, "Omitting empty section");
        return;
    }
    out.push_str(&format!("\n## {title}\n\n{}\n", body.trim_end()));
}

fn push_program(out: &mut String, source: &str) {
    out.push_str("\n## Program\n\n```prose\n");
    out.push_str(source);
    if !source.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("```\n");
}

pub fn boot(state: &IdentityState, vm_semantics: &str, skill_guide: &str) -> String {
    let mut out = format!(
        "{BOOT_BANNER}.\n\nSession: {}\nUser: {}\n",
        state.session_id, state.user_id
    );
    push_section(&mut out, "VM Semantics", vm_semantics);
    push_section(&mut out, "Skill Guide", skill_guide);
    out.push_str(&format!("\n{NARRATION_INSTRUCTION}\n"));
    out
}

pub fn run(path: &str, source: &str, vm_semantics: &str) -> String {
    let mut out = format!("{RUN_HEADER} {path}\n");
    push_program(&mut out, source);
    push_section(&mut out, "VM Semantics", vm_semantics);
    out.push_str("\n## Instructions\n\n");
    for (i, behaviour) in RUN_BEHAVIOURS.iter().enumerate() {
        out.push_str(&format!("{}. {behaviour}\n", i + 1));
    }
    out
}

pub fn compile(path: &str, source: &str, language_spec: &str) -> String {
    let mut out = format!("{COMPILE_HEADER} {path}\n");
    push_section(&mut out, "Language Specification", language_spec);
    push_program(&mut out, source);
    out.push_str(&format!("\n{COMPILE_INSTRUCTION}\n"));
    out
}

pub fn read_error(path: &str, error: &std::io::Error) -> String {
    format!("Error reading OpenProse program {path}: {error}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TelemetrySetting;

    fn state() -> IdentityState {
        IdentityState {
            user_id: "user-abc123abc123".into(),
            session_id: "sess-1000-xyz789".into(),
            telemetry: TelemetrySetting::Enabled,
        }
    }

    #[test]
    fn boot_contains_banner_ids_and_documents() {
        let text = boot(&state(), "VM RULES", "SKILL RULES");
        assert!(text.starts_with("OpenProse VM initialized"));
        assert!(text.contains("sess-1000-xyz789"));
        assert!(text.contains("user-abc123abc123"));
        assert!(text.contains("## VM Semantics\n\nVM RULES"));
        assert!(text.contains("## Skill Guide\n\nSKILL RULES"));
        assert!(text.contains("narration protocol"));
    }

    #[test]
    fn boot_omits_missing_documents() {
        let text = boot(&state(), "", "  \n");
        assert!(!text.contains("## VM Semantics"));
        assert!(!text.contains("## Skill Guide"));
        assert!(text.contains(BOOT_BANNER));
    }

    #[test]
    fn run_lists_numbered_behaviours() {
        let text = run("demo.prose", "session \"hi\"", "VM");
        assert!(text.starts_with("Executing OpenProse program: demo.prose"));
        assert!(text.contains("```prose\nsession \"hi\"\n```"));
        for n in 1..=6 {
            assert!(text.contains(&format!("\n{n}. ")), "missing step {n}");
        }
        assert!(text.contains("sub-session"));
        assert!(text.contains("parallel"));
        assert!(text.contains("discretion"));
    }

    #[test]
    fn program_text_is_verbatim() {
        let source = "let x = session \"a\"\n\n  parallel:\n    session \"b\"\n";
        let text = run("p.prose", source, "");
        assert!(text.contains(source));
    }

    #[test]
    fn compile_contains_spec_and_program() {
        let text = compile("p.prose", "session \"x\"", "SPEC BODY");
        assert!(text.starts_with("Compiling OpenProse program: p.prose"));
        assert!(text.contains("SPEC BODY"));
        assert!(text.contains("session \"x\""));
        assert!(text.contains("syntax error"));
    }

    #[test]
    fn read_error_names_path() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file");
        let text = read_error("/tmp/missing.prose", &err);
        assert!(text.contains("/tmp/missing.prose"));
        assert!(text.contains("No such file"));
    }
}
