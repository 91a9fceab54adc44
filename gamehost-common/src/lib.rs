// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

pub mod interaction;
pub mod profile;
pub mod queue;
pub mod signature;

use regex::Regex;

pub use interaction::{
    BACKEND_ENDPOINT, DeferredJob, GAME_OPTION, Interaction, InteractionRequest,
    InteractionResponse, InteractionType, ResponseType, SIGNATURE_HEADER, START_COMMAND,
    STOP_COMMAND, TIMESTAMP_HEADER,
};
pub use profile::{GameCatalog, GameProfile, GameProfileLookup, ProfileError, RunSpec};
pub use queue::{DeferredQueue, MESSAGE_GROUP_ID, QueuedJob, SqsDeferredQueue};
pub use signature::SignatureVerifier;

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

/// Resolve every key through `lookup`, failing with one error that names all
/// keys that are unset or blank.
pub fn required_vars<F>(lookup: &F, keys: &[&str]) -> anyhow::Result<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut values = Vec::with_capacity(keys.len());
    let mut missing = Vec::new();
    for key in keys {
        match lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            Some(value) => values.push(value),
            None => missing.push(*key),
        }
    }

    if !missing.is_empty() {
        anyhow::bail!("missing environment variables: [{}]", missing.join(", "));
    }
    Ok(values)
}
