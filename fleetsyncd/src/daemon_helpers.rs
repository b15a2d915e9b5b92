type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn read_string_env(env: EnvLookup<'_>, name: &str) -> Option<String> {
    env(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64_env(env: EnvLookup<'_>, name: &str, default: u64) -> u64 {
    env(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(env: EnvLookup<'_>, name: &str, default: bool) -> bool {
    env(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn eligibility_overrides(env: EnvLookup<'_>) -> Vec<(EntityKind, String)> {
    EntityKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let name = format!(
                "FLEETSYNC_{}_ELIGIBILITY_FIELD",
                kind.as_str().to_ascii_uppercase()
            );
            read_string_env(env, &name).map(|field| (kind, field))
        })
        .collect()
}

fn log_reports(reports: &[PassReport]) {
    let written: usize = reports.iter().map(|report| report.written).sum();
    let failed: usize = reports
        .iter()
        .map(|report| report.failed + report.rejected)
        .sum();
    if failed > 0 {
        warn!(written, failed, "sync finished with item failures");
    } else {
        info!(written, "sync finished");
    }
}
