use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Tuning for shadow branch synchronization.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, smart_default::SmartDefault)]
#[serde(default)]
pub struct SyncConfig {
    /// The prefix of shadow branches, followed by the pull request id
    /// (default: "rp-")
    #[default("rp-")]
    pub shadow_branch_prefix: String,
    /// The prefix of the temporary branch used to synthesize a config commit
    /// (default: "build-bot-temp-")
    #[default("build-bot-temp-")]
    pub temp_branch_prefix: String,
    /// Seconds to wait after a pull request is opened before creating its shadow branch
    #[default(5)]
    pub create_branch_delay_secs: u64,
    /// Seconds of quiet after a push before the shadow branch follows it
    #[default(300)]
    pub sync_delay_secs: u64,
    /// Seconds between countdown status updates
    #[default(60)]
    pub countdown_interval_secs: u64,
    /// The CI config file that is replaced when a pull request asks for a variant
    #[default(".travis.yml")]
    pub ci_config_path: String,
    /// The variant config path, `{mark}` is replaced by the title mark
    #[default(".travis-{mark}.yml")]
    pub ci_config_variant: String,
    /// Competing CI configs deleted from a synthesized config commit
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "string_or_vec")]
    pub removed_ci_config_paths: Vec<String>,
    /// Pull requests whose base ref contains this marker are bot scaffolding and ignored
    #[default("temp-pr")]
    pub ignored_base_ref_marker: String,
}

impl SyncConfig {
    pub fn shadow_branch(&self, pr_id: u64) -> String {
        format!("{}{pr_id}", self.shadow_branch_prefix)
    }

    pub fn temp_branch(&self, shadow_branch: &str) -> String {
        format!("{}{shadow_branch}", self.temp_branch_prefix)
    }

    pub fn variant_path(&self, mark: &str) -> String {
        self.ci_config_variant.replace("{mark}", mark)
    }

    pub fn is_ignored_base(&self, base_ref: &str) -> bool {
        !self.ignored_base_ref_marker.is_empty() && base_ref.contains(&self.ignored_base_ref_marker)
    }

    pub fn create_branch_delay(&self) -> Duration {
        Duration::from_secs(self.create_branch_delay_secs)
    }

    pub fn sync_delay(&self) -> Duration {
        Duration::from_secs(self.sync_delay_secs)
    }

    pub fn countdown_interval(&self) -> Duration {
        Duration::from_secs(self.countdown_interval_secs.max(1))
    }

    /// Whole countdown steps until the shadow branch follows a push, at least one
    pub fn countdown_steps(&self) -> u64 {
        self.sync_delay_secs.div_ceil(self.countdown_interval_secs.max(1)).max(1)
    }
}

/// The lowercase mark of a title starting with `[mark]`.
pub fn title_mark(title: &str) -> Option<String> {
    let rest = title.trim_start().strip_prefix('[')?;
    let (mark, _) = rest.split_once(']')?;

    if mark.is_empty() || !mark.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    Some(mark.to_lowercase())
}

fn string_or_vec<'de, D: Deserializer<'de>>(s: D) -> Result<Vec<String>, D::Error> {
    use serde::de::SeqAccess;

    struct StringOrVecVisitor;

    impl<'de> serde::de::Visitor<'de> for StringOrVecVisitor {
        type Value = Vec<String>;

        #[cfg_attr(coverage_nightly, coverage(off))]
        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or a vector of strings")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(value) = seq.next_element()? {
                vec.push(value);
            }
            Ok(vec)
        }
    }

    s.deserialize_any(StringOrVecVisitor)
}
