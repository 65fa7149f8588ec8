use super::{json_pretty, maybe_spinner, spin_fail, spin_ok, EXIT_SUCCESS};
use cabin_core::Manager;

pub fn run(manager: &Manager, name: &str, json: bool) -> Result<u8, String> {
    let pb = maybe_spinner(json, &format!("starting {name}..."));
    let started = match manager.start(name) {
        Ok(started) => started,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "start failed");
            }
            return Err(e.to_string());
        }
    };
    if let Some(ref pb) = pb {
        if started {
            spin_ok(pb, &format!("started environment '{name}'"));
        } else {
            spin_ok(pb, &format!("environment '{name}' is already running"));
        }
    }
    if json {
        let payload = serde_json::json!({
            "name": name,
            "started": started,
            "status": "running"
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
