use anyhow::{Context, Result};
use stampede_policy::PolicyManager;

use crate::PolicyCommand;

pub fn handle(policies: &mut PolicyManager, command: PolicyCommand) -> Result<()> {
    match command {
        PolicyCommand::List => {
            for policy in policies.list_policies() {
                println!("{:<16} {}", policy.name, policy.description);
            }
        }

        PolicyCommand::Show { name } => {
            let policy = policies.get_policy(&name)?;
            println!("{}", serde_json::to_string_pretty(policy)?);
        }

        PolicyCommand::Export { output } => {
            let json = policies.export_policies()?;
            crate::emit(&json, output.as_deref())?;
        }

        // Imported policies live for this process only; pass the file with --policies to use it.
        PolicyCommand::Import { file } => {
            let json = crate::read(&file)?;
            let count = policies
                .import_policies(&json)
                .with_context(|| format!("invalid policy file {}", file.display()))?;
            println!(
                "✅ {} policies in {} are valid; use --policies {} to apply them",
                count,
                file.display(),
                file.display()
            );
        }
    }
    Ok(())
}
