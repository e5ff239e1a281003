use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Queue URL and storage endpoint are set
/// - Concurrency limit and poll interval are non-zero
/// - Lease renewal happens strictly inside the visibility window
/// - Every stage has a program
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let fail = |msg: &str| -> Result<(), ConfigError> {
        Err(ConfigError::ValidationError(msg.to_string()))
    };

    if config.queue.url.trim().is_empty() {
        return fail("queue.url cannot be empty");
    }
    if config.storage.endpoint.trim().is_empty() {
        return fail("storage.endpoint cannot be empty");
    }

    if config.dispatcher.max_concurrent_jobs == 0 {
        return fail("dispatcher.max_concurrent_jobs cannot be 0");
    }
    if config.dispatcher.poll_interval_secs == 0 {
        return fail("dispatcher.poll_interval_secs cannot be 0");
    }

    if config.queue.visibility_timeout_secs == 0 {
        return fail("queue.visibility_timeout_secs cannot be 0");
    }
    if config.queue.renew_interval_secs == 0
        || config.queue.renew_interval_secs >= config.queue.visibility_timeout_secs
    {
        return fail("queue.renew_interval_secs must be between 1 and visibility_timeout_secs - 1");
    }
    if config.queue.max_delivery_attempts == 0 {
        return fail("queue.max_delivery_attempts cannot be 0");
    }

    for (name, command) in config.stages.commands() {
        if command.program.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "stages.{}.program cannot be empty",
                name
            )));
        }
    }

    Ok(())
}
