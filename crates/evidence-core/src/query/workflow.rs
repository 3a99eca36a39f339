//! Evidence gathering: run an ordered list of retrieval steps for one
//! criterion and concatenate their sections into a single bounded text.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{EvidenceError, EvidenceResult};
use crate::indexer::filesystem::WorkspaceStructure;
use crate::query::facade::{CodeSearch, SearchMode};
use crate::query::tokenizer::{truncate_tokens, DropMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStep {
    UserQuery,
    Workspace,
    Locate,
    Read,
    Search,
    History,
    Trajectory,
}

impl EvidenceStep {
    pub const ALL: [EvidenceStep; 7] = [
        EvidenceStep::UserQuery,
        EvidenceStep::Workspace,
        EvidenceStep::Locate,
        EvidenceStep::Read,
        EvidenceStep::Search,
        EvidenceStep::History,
        EvidenceStep::Trajectory,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EvidenceStep::UserQuery => "user_query",
            EvidenceStep::Workspace => "workspace",
            EvidenceStep::Locate => "locate",
            EvidenceStep::Read => "read",
            EvidenceStep::Search => "search",
            EvidenceStep::History => "history",
            EvidenceStep::Trajectory => "trajectory",
        }
    }
}

impl fmt::Display for EvidenceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceStep {
    type Err = EvidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvidenceStep::ALL
            .into_iter()
            .find(|step| step.as_str() == s.trim())
            .ok_or_else(|| EvidenceError::UnknownStep(s.to_string()))
    }
}

/// Whether execution traces of the judged agent may be consulted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    #[default]
    GrayBox,
    BlackBox,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub steps: Vec<EvidenceStep>,
}

impl Workflow {
    pub fn new(steps: Vec<EvidenceStep>) -> Self {
        Self { steps }
    }

    pub fn comprehensive() -> Self {
        Self::new(EvidenceStep::ALL.to_vec())
    }

    pub fn efficient() -> Self {
        Self::new(vec![
            EvidenceStep::Workspace,
            EvidenceStep::Locate,
            EvidenceStep::Read,
            EvidenceStep::Trajectory,
        ])
    }

    /// Steps used to answer a free-form question about the workspace.
    pub fn question() -> Self {
        Self::new(vec![
            EvidenceStep::Workspace,
            EvidenceStep::Locate,
            EvidenceStep::Read,
            EvidenceStep::Search,
        ])
    }

    /// Black-box judging has no trajectory to consult.
    pub fn for_setting(mut self, setting: Setting) -> Self {
        if setting == Setting::BlackBox {
            self.steps.retain(|step| *step != EvidenceStep::Trajectory);
        }
        self
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> EvidenceResult<Self> {
        let steps = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<EvidenceResult<Vec<_>>>()?;
        Ok(Self::new(steps))
    }

    pub fn contains(&self, step: EvidenceStep) -> bool {
        self.steps.contains(&step)
    }
}

/// Evidence supplied by the caller rather than derived from the index.
pub trait EvidenceSources {
    /// Overrides the generated workspace listing.
    fn workspace_summary(&self) -> Option<String> {
        None
    }

    fn history(&self) -> Option<String> {
        None
    }

    fn trajectory(&self, _criteria: &str) -> Option<String> {
        None
    }
}

pub struct NoSources;

impl EvidenceSources for NoSources {}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GatheredEvidence {
    pub text: String,
    pub located_files: Vec<PathBuf>,
}

pub struct EvidenceGatherer<'a> {
    search: &'a CodeSearch,
    sources: &'a dyn EvidenceSources,
}

impl<'a> EvidenceGatherer<'a> {
    pub fn new(search: &'a CodeSearch, sources: &'a dyn EvidenceSources) -> Self {
        Self { search, sources }
    }

    fn workspace_summary(&self) -> EvidenceResult<String> {
        let summary = match self.sources.workspace_summary() {
            Some(summary) => summary,
            None => {
                WorkspaceStructure::collect(self.search.root(), &self.search.config().scan)?
                    .summary(None)
            }
        };
        Ok(truncate_tokens(
            &summary,
            self.search.config().display.workspace_tokens,
            DropMode::Middle,
        ))
    }

    pub fn gather(
        &self,
        criteria: &str,
        user_query: &str,
        workflow: &Workflow,
    ) -> EvidenceResult<GatheredEvidence> {
        let display = &self.search.config().display;
        let needs_summary =
            workflow.contains(EvidenceStep::Workspace) || workflow.contains(EvidenceStep::Locate);
        let summary = if needs_summary {
            self.workspace_summary()?
        } else {
            String::new()
        };

        let mut text = String::new();
        let mut located: Vec<PathBuf> = Vec::new();
        for step in &workflow.steps {
            match step {
                EvidenceStep::UserQuery => {
                    if !user_query.is_empty() {
                        text.push_str(&format!(
                            ">>> [Reference] Original User Query:\n\n{user_query}\n\n"
                        ));
                    }
                }
                EvidenceStep::Workspace => {
                    text.push_str(&format!(
                        ">>> [Key Evidence] Workspace Structure:\n\n{summary}\n\n"
                    ));
                }
                EvidenceStep::Locate => {
                    located = self.search.locate(criteria, &summary);
                    tracing::info!(files = located.len(), "located files for criterion");
                }
                EvidenceStep::Read => {
                    for path in &located {
                        let content = match std::fs::read_to_string(path) {
                            Ok(content) => content,
                            Err(e) => {
                                tracing::warn!(path = %path.display(), error = %e, "located file unreadable");
                                continue;
                            }
                        };
                        let content = truncate_tokens(&content, display.file_tokens, DropMode::Middle);
                        text.push_str(&format!(
                            ">>> [Key Evidence] Content of Files:\n\nContent of {}:\n```\n{content}\n```\n",
                            path.display()
                        ));
                    }
                }
                EvidenceStep::Search => match self.search.search(criteria, SearchMode::Embedding) {
                    Ok(contexts) => {
                        for context in &contexts {
                            text.push_str(&format!(
                                ">>> [Reference] Relevant Search Evidence:\n\n{}\n\n",
                                self.search.display(context)
                            ));
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "search step skipped"),
                },
                EvidenceStep::History => match self.sources.history() {
                    Some(history) => text.push_str(&format!(
                        ">>> [Reference] Historical Judgments:\n\n{history}\n\n"
                    )),
                    None => tracing::warn!("no historical evidence available"),
                },
                EvidenceStep::Trajectory => match self.sources.trajectory(criteria) {
                    Some(trajectory) => text.push_str(&format!(
                        ">>> [Reference] Trajectory Evidence:\n\n{trajectory}\n\n"
                    )),
                    None => tracing::debug!("no trajectory evidence available"),
                },
            }
        }

        Ok(GatheredEvidence {
            text: truncate_tokens(&text, display.combined_tokens, DropMode::Middle),
            located_files: located,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::indexer::pipeline::build_index;
    use crate::query::embedder::HashingEmbedder;
    use crate::query::facade::QueryStats;
    use crate::query::tokenizer::estimate_tokens;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    struct Recorded;

    impl EvidenceSources for Recorded {
        fn history(&self) -> Option<String> {
            Some("requirement 0: satisfied".into())
        }

        fn trajectory(&self, criteria: &str) -> Option<String> {
            Some(format!("agent wrote db.py while handling: {criteria}"))
        }
    }

    fn searcher(root: &Path, config: IndexConfig) -> CodeSearch {
        let out = build_index(root, &config).unwrap();
        CodeSearch::new(
            root,
            out.tags,
            out.graph,
            config,
            Arc::new(HashingEmbedder::default()),
            Arc::new(QueryStats::new()),
        )
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("src/db.py"),
            "def connect(url):\n    return open_connection(url)\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("src/cli.py"),
            "from db import connect\n\ndef main():\n    connect('sqlite://')\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn step_names_round_trip_and_reject_unknown() {
        for step in EvidenceStep::ALL {
            assert_eq!(step.as_str().parse::<EvidenceStep>().unwrap(), step);
        }
        let err = Workflow::from_names(&["workspace", "planning"]).unwrap_err();
        assert!(matches!(err, EvidenceError::UnknownStep(ref s) if s == "planning"));
    }

    #[test]
    fn presets_and_black_box() {
        assert_eq!(Workflow::comprehensive().steps.len(), 7);
        let efficient = Workflow::efficient().for_setting(Setting::BlackBox);
        assert_eq!(
            efficient.steps,
            vec![EvidenceStep::Workspace, EvidenceStep::Locate, EvidenceStep::Read]
        );
        assert!(!Workflow::question().contains(EvidenceStep::Trajectory));
    }

    #[test]
    fn comprehensive_gather_emits_sections_in_order() {
        let ws = workspace();
        let search = searcher(ws.path(), IndexConfig::default());
        let gatherer = EvidenceGatherer::new(&search, &Recorded);
        let evidence = gatherer
            .gather("connect opens the database", "Build a db tool", &Workflow::comprehensive())
            .unwrap();

        let order = [
            ">>> [Reference] Original User Query:",
            ">>> [Key Evidence] Workspace Structure:",
            ">>> [Key Evidence] Content of Files:",
            ">>> [Reference] Relevant Search Evidence:",
            ">>> [Reference] Historical Judgments:",
            ">>> [Reference] Trajectory Evidence:",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|marker| evidence.text.find(marker).unwrap_or_else(|| panic!("{marker} missing")))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
        assert_eq!(evidence.located_files[0], ws.path().join("src/db.py"));
        assert!(evidence.text.contains("def connect(url):"));
    }

    #[test]
    fn read_without_locate_adds_nothing() {
        let ws = workspace();
        let search = searcher(ws.path(), IndexConfig::default());
        let gatherer = EvidenceGatherer::new(&search, &NoSources);
        let evidence = gatherer
            .gather("connect", "", &Workflow::new(vec![EvidenceStep::Read, EvidenceStep::History]))
            .unwrap();
        assert!(evidence.text.is_empty());
        assert!(evidence.located_files.is_empty());
    }

    #[test]
    fn long_files_keep_both_ends() {
        let ws = workspace();
        let body: String = (0..3000).map(|i| format!("    step_{i} = {i}\n")).collect();
        fs::write(
            ws.path().join("src/db.py"),
            format!("def connect(url):\n{body}    return finish_connect(url)\n"),
        )
        .unwrap();
        let mut config = IndexConfig::default();
        config.display.file_tokens = 200;
        let search = searcher(ws.path(), config);
        let gatherer = EvidenceGatherer::new(&search, &NoSources);
        let workflow = Workflow::new(vec![EvidenceStep::Locate, EvidenceStep::Read]);
        let evidence = gatherer.gather("connect", "", &workflow).unwrap();
        assert!(evidence.text.contains("def connect(url):"));
        assert!(evidence.text.contains("finish_connect"));
        assert!(evidence.text.contains("..."));
    }

    #[test]
    fn combined_text_respects_budget() {
        let ws = workspace();
        fs::write(ws.path().join("src/big.py"), "payload = 1\n".repeat(5000)).unwrap();
        let mut config = IndexConfig::default();
        config.display.combined_tokens = 300;
        config.display.file_tokens = 100;
        let search = searcher(ws.path(), config);
        let gatherer = EvidenceGatherer::new(&search, &Recorded);
        let evidence = gatherer
            .gather("payload connect main", "q", &Workflow::comprehensive())
            .unwrap();
        assert!(estimate_tokens(&evidence.text) <= 300);
        assert!(evidence.text.starts_with(">>> [Reference] Original User Query:"));
        assert!(evidence.text.contains("..."));
    }
}
