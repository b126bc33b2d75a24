//! `sheetgate config`: Configuration management commands.

use sheetgate_config::EngineConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match EngineConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();

            let costs = &config.rate_limit.cost_table;
            let max_cost = costs.read.max(costs.write).max(costs.batch);
            if max_cost > config.rate_limit.max_tokens {
                warnings.push("A call cost exceeds max_tokens; such calls are clamped to capacity");
            }

            if config.dedupe.dedupe_ttl_ms == 0 {
                warnings.push("dedupe_ttl_ms = 0 only collapses calls that are in flight together");
            }

            if config.breaker.window_ms < config.breaker.reset_timeout_ms {
                warnings.push("Breaker window is shorter than its reset timeout");
            }

            if config.tasks.sweep_interval_ms > config.tasks.default_task_ttl_ms {
                warnings.push("Sweep interval exceeds task TTL; expired tasks linger until the next sweep");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!(
                "   Rate limit: {} tokens, {}/s refill",
                config.rate_limit.max_tokens, config.rate_limit.refill_rate_per_second
            );
            println!(
                "   Breaker:    {} failures / {}ms, reset after {}ms",
                config.breaker.failure_threshold,
                config.breaker.window_ms,
                config.breaker.reset_timeout_ms
            );
            println!("   Dedupe TTL: {}ms", config.dedupe.dedupe_ttl_ms);
            println!(
                "   Tasks:      ttl {}ms, chunk {}",
                config.tasks.default_task_ttl_ms, config.tasks.background_chunk_size
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = EngineConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = EngineConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() && !force {
        println!("  Config file exists: {}", config_path.display());
        println!("  Use --force to overwrite it with defaults");
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, EngineConfig::default_toml())?;
    println!("✅ Wrote default config: {}", config_path.display());
    Ok(())
}
