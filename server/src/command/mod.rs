pub mod retest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetestScope {
    /// Restart only the contexts that did not succeed
    Failed,
    /// Rebuild the shadow branch so every context runs again
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotCommand {
    pub scope: RetestScope,
    /// Ignore outstanding timers and, for a single-context retest, restart successful contexts too
    pub force: bool,
}

impl BotCommand {
    /// Parse a comment addressed to `@bot_name`. Anything that is not a known command is ignored.
    pub fn parse(body: &str, bot_name: &str) -> Option<Self> {
        let mention = format!("@{}", bot_name.to_lowercase());
        let body = body.trim().to_lowercase();

        let position = body.find(&mention)?;
        let rest = &body[position + mention.len()..];

        // `@bot-name` is a different account
        if rest.starts_with(|c: char| c.is_alphanumeric() || c == '-' || c == '_') {
            return None;
        }

        let command = format!("{}{}", &body[..position], rest);
        let command = command.trim();
        let command = command.strip_prefix('/').unwrap_or(command).trim();

        let command = command
            .strip_prefix("retest")
            .or_else(|| command.strip_prefix("restart"))?;

        let (scope, force) = match command {
            "" => (RetestScope::Failed, false),
            "-force" => (RetestScope::Failed, true),
            "-all" => (RetestScope::All, false),
            "-force-all" => (RetestScope::All, true),
            _ => return None,
        };

        Some(Self { scope, force })
    }
}
