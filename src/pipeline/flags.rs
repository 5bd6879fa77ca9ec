use log::warn;

use crate::models::Environment;

/// Flags in priority order, highest first.
const FLAGS: [(&str, Environment); 3] = [
    ("[prod]", Environment::Production),
    ("[staging]", Environment::Staging),
    ("[dev]", Environment::Development),
];

/// Extract the deployment target from a commit message.
///
/// Matching is case-sensitive. When several flags are present the
/// highest-priority one wins; a message without flags is review-only.
pub fn parse_target(message: &str) -> Option<Environment> {
    let found: Vec<_> = FLAGS
        .iter()
        .filter(|(flag, _)| message.contains(flag))
        .collect();

    if found.len() > 1 {
        let names: Vec<&str> = found.iter().map(|(flag, _)| *flag).collect();
        warn!(
            "Commit message carries several deployment flags ({}), using {}",
            names.join(", "),
            names[0]
        );
    }

    found.first().map(|(_, env)| *env)
}
