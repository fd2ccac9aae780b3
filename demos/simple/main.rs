use std::collections::HashMap;

use switchboard::{ClientConfig, ErrorKind, EvaluationEvent, NewFlag, NewRule};

pub fn main() -> switchboard::Result<()> {
    env_logger::init();

    // Persist the catalog to a file if one is given, otherwise keep it in memory.
    let mut config = match std::env::var("SWITCHBOARD_CATALOG") {
        Ok(path) => ClientConfig::from_file(path)?,
        Err(_) => ClientConfig::in_memory(),
    };
    config.evaluation_logger(|event: EvaluationEvent| {
        println!("Evaluation: {}", serde_json::to_string(&event).unwrap_or_default());
    });
    let client = config.to_client();

    match client.create_flag(
        NewFlag::new("new-checkout", "New checkout")
            .description("Redesigned checkout flow")
            .enabled(true)
            .variation("control", "v1")
            .variation("treatment", "v2"),
    ) {
        Ok(_) => {
            client.create_rule("new-checkout", NewRule::new("plan", "equals", "premium", 1))?;
        }
        // Flag is already in the catalog file from a previous run.
        Err(err) if err.kind() == ErrorKind::Conflict => {}
        Err(err) => return Err(err),
    }

    for plan in ["premium", "free"] {
        let context = HashMap::from([("plan".to_owned(), plan.to_owned())]);
        let result = client.evaluate("new-checkout", &context);
        println!(
            "plan={plan}: enabled={} variation={:?} reason={}",
            result.enabled, result.variation_name, result.reason
        );
    }

    // Evaluation never fails: missing flags are served as disabled.
    let result = client.evaluate_simple("old-checkout", "plan", "premium");
    println!("old-checkout: enabled={} reason={}", result.enabled, result.reason);

    Ok(())
}
