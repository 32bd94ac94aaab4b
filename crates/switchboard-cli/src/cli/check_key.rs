//! `swbd check-key`: print the conversation key for a channel/scope/id.

use anyhow::Result;
use console::style;

use switchboard_core::message::conversation::build_conversation_key_from_parts;

pub fn check_key(channel: &str, scope: &str, id: &str, json: bool) -> Result<()> {
    let key = build_conversation_key_from_parts(channel, scope, id)?;

    if json {
        let out = serde_json::json!({
            "channel": channel,
            "scope": scope,
            "id": id,
            "conversation_key": key,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", style(&key).cyan());
    }
    Ok(())
}
