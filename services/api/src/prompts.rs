//! Prompt Loading
//!
//! Every collaborator's system instruction is a Markdown file named after it
//! in the prompts directory. Missing files fall back to the short built-in
//! defaults below, so the service runs with an empty or absent directory.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const INTERVIEWER: &str = "interviewer";
pub const SUBJECT: &str = "subject";
pub const DIAGNOSIS_TRIGGER: &str = "diagnosis_trigger";
pub const DIAGNOSER: &str = "diagnoser";
pub const DIAGNOSIS_EVAL: &str = "diagnosis_eval";
pub const Q_RANKER: &str = "q_ranker";
pub const ADVISOR: &str = "advisor_agent";
pub const HIGHLIGHTER: &str = "highlight_agent";
pub const PATIENT_PROFILE: &str = "patient_profile";

const DEFAULTS: &[(&str, &str)] = &[
    (
        INTERVIEWER,
        "You are a caring, professional triage nurse conducting an intake assessment before \
         the doctor sees the patient. Ask ONE question at a time and wait for the answer. \
         Follow any bracketed advisor instruction you are given. Be empathetic but efficient.",
    ),
    (
        SUBJECT,
        "You are a patient at a clinic talking to the triage nurse. Answer the nurse's \
         questions naturally and concisely, staying consistent with your history.",
    ),
    (
        DIAGNOSIS_TRIGGER,
        "Decide whether the latest turns of the interview contain new diagnosable \
         information. Reply with JSON: {\"should_run\": bool, \"reason\": string}.",
    ),
    (
        DIAGNOSER,
        "Propose differential diagnoses from the interview. Reply with JSON: \
         {\"diagnosis_list\": [{\"did\": string, \"diagnosis\": string, \
         \"indicators_point\": [string]}], \"follow_up_questions\": [string]}. Reuse the ids \
         of diagnoses already in the state.",
    ),
    (
        DIAGNOSIS_EVAL,
        "Merge the master pool with the new candidates into one deduplicated list. Reply with \
         JSON: {\"diagnoses\": [{\"did\": string, \"diagnosis\": string, \
         \"indicators_point\": [string]}]}.",
    ),
    (
        Q_RANKER,
        "Rank the open questions by clinical priority, most urgent first. Reply with JSON: \
         {\"ranking\": [{\"qid\": string, \"rank\": integer}]}. Omit questions that are no \
         longer relevant.",
    ),
    (
        ADVISOR,
        "Advise the nurse on what to ask next, preferring the highest ranked open question. \
         Reply with JSON: {\"question\": string, \"qid\": string or null, \
         \"end_conversation\": bool, \"reasoning\": string}.",
    ),
    (
        HIGHLIGHTER,
        "Extract the clinically notable fragments of the patient's answer. Reply with JSON: \
         {\"highlights\": [{\"level\": \"danger\" | \"warning\", \"text\": string}]}.",
    ),
    (PATIENT_PROFILE, ""),
];

/// Reads every `.md` file in `dir_path`, keyed by file stem.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// Loaded prompts with built-in fallbacks.
#[derive(Debug, Clone, Default)]
pub struct PromptSet {
    loaded: HashMap<String, String>,
}

impl PromptSet {
    /// Loads `dir_path`, treating a missing directory as empty.
    pub fn load(dir_path: &Path) -> Result<Self> {
        if !dir_path.exists() {
            warn!(path = %dir_path.display(), "Prompts directory not found, using built-in prompts");
            return Ok(Self::default());
        }
        let loaded = load_prompts(dir_path)?;
        info!(count = loaded.len(), path = %dir_path.display(), "Prompts loaded");
        Ok(Self { loaded })
    }

    pub fn from_map(loaded: HashMap<String, String>) -> Self {
        Self { loaded }
    }

    /// The prompt called `name`, or its built-in default (empty if unknown).
    pub fn get(&self, name: &str) -> &str {
        if let Some(prompt) = self.loaded.get(name).filter(|p| !p.trim().is_empty()) {
            return prompt.trim();
        }
        DEFAULTS
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, text)| *text)
            .unwrap_or_default()
    }

    pub fn patient_profile(&self) -> &str {
        self.get(PATIENT_PROFILE)
    }

    /// The subject's instruction, with the patient profile appended when present.
    pub fn subject_instruction(&self) -> String {
        match self.patient_profile() {
            "" => self.get(SUBJECT).to_string(),
            profile => format!("{}\n\n**Your history:**\n{}", self.get(SUBJECT), profile),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_prompts_successfully() -> Result<()> {
        let dir = tempdir()?;
        let dir_path = dir.path();

        let mut file1 = File::create(dir_path.join("interviewer.md"))?;
        writeln!(file1, "You are Nurse Sarah.")?;
        let mut ignored_file = File::create(dir_path.join("notes.txt"))?;
        writeln!(ignored_file, "not a prompt")?;
        std::fs::create_dir(dir_path.join("subdir"))?;

        let prompts = load_prompts(dir_path)?;

        assert_eq!(prompts.len(), 1, "Should only load .md files");
        assert_eq!(prompts.get("interviewer").unwrap(), "You are Nurse Sarah.\n");
        assert!(prompts.get("notes").is_none());
        Ok(())
    }

    #[test]
    fn test_load_prompts_from_nonexistent_dir() {
        let result = load_prompts(Path::new("nonexistent_dir_for_testing_prompts"));
        assert!(result.is_err());
    }

    #[test]
    fn test_prompt_set_falls_back_to_defaults() -> Result<()> {
        let dir = tempdir()?;
        let mut file = File::create(dir.path().join("q_ranker.md"))?;
        writeln!(file, "Custom ranking rules.")?;
        // Blank files do not override the default.
        File::create(dir.path().join("advisor_agent.md"))?;

        let prompts = PromptSet::load(dir.path())?;

        assert_eq!(prompts.get(Q_RANKER), "Custom ranking rules.");
        assert!(prompts.get(ADVISOR).contains("end_conversation"));
        assert!(prompts.get(DIAGNOSER).contains("diagnosis_list"));
        assert_eq!(prompts.get("unknown"), "");
        Ok(())
    }

    #[test]
    fn test_prompt_set_tolerates_missing_directory() -> Result<()> {
        let prompts = PromptSet::load(Path::new("nonexistent_dir_for_testing_prompts"))?;
        assert!(prompts.get(INTERVIEWER).contains("triage nurse"));
        Ok(())
    }

    #[test]
    fn test_subject_instruction_includes_profile() {
        let without = PromptSet::default();
        assert_eq!(without.subject_instruction(), without.get(SUBJECT));

        let with = PromptSet::from_map(HashMap::from([(
            PATIENT_PROFILE.to_string(),
            "45-year-old, upper right abdominal pain for 3 days.".to_string(),
        )]));
        let instruction = with.subject_instruction();
        assert!(instruction.starts_with(with.get(SUBJECT)));
        assert!(instruction.contains("upper right abdominal pain"));
    }
}
