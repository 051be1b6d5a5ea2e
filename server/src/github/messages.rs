use serde::Serialize;

use super::models::StatusState;
use crate::utils::format_fn;

/// The terminal outcome of every CI context for one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub sha: String,
    pub state: StatusState,
    /// `(context, target url)` per CI context
    pub details: Vec<(String, Option<String>)>,
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.state == StatusState::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueMessage {
    TestsFinished(TestReport),
}

impl std::fmt::Display for IssueMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueMessage::TestsFinished(report) => {
                let (glyph, verb) = if report.passed() {
                    (":white_check_mark:", "passed")
                } else {
                    (":x:", "failed")
                };

                write!(f, "{glyph} Tests for the commit {sha} have {verb}.", sha = report.sha)?;

                match report.details.as_slice() {
                    [] => Ok(()),
                    [(_, Some(url))] => write!(f, " See [details]({url})."),
                    [(_, None)] => Ok(()),
                    details => {
                        write!(f, " See details:")?;
                        for (context, url) in details {
                            write!(
                                f,
                                "\n- {}",
                                format_fn(|f| match url {
                                    Some(url) => write!(f, "[{context}]({url})"),
                                    None => write!(f, "{context}"),
                                })
                            )?;
                        }

                        Ok(())
                    }
                }
            }
        }
    }
}

impl Serialize for IssueMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("IssueMessage", 1)?;
        state.serialize_field("body", &self.to_string())?;
        state.end()
    }
}

/// Status description shown while a new push waits for the shadow branch to be updated.
pub fn countdown_description(minutes_left: u64) -> String {
    if minutes_left == 0 {
        return "Tests have been triggered by a modification and will start shortly.".to_owned();
    }

    format!(
        "Tests have been triggered by a modification and will start in {minutes_left} minute{}.",
        if minutes_left == 1 { "" } else { "s" }
    )
}

/// Status description for the bot's own context once every CI context finished.
pub fn outcome_description(state: StatusState) -> String {
    match state {
        StatusState::Success => "All tests have passed.".to_owned(),
        _ => "Some tests have failed.".to_owned(),
    }
}
