use tabflow_engine::execution::builtin_executions;
use tabflow_engine::modules::builtin_registry;

/// Execute the `modules` command: list registered modules and strategies.
pub fn execute() {
    let modules = builtin_registry();
    println!("Modules ({}):", modules.len());
    for entry in modules.entries() {
        println!("  {:20} {}", entry.name, entry.path);
    }

    let executions = builtin_executions();
    println!("\nExecution strategies ({}):", executions.len());
    for entry in executions.entries() {
        println!("  {:20} {}", entry.name, entry.path);
    }
}
