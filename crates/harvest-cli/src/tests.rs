use super::*;

fn config() -> harvest_core::AppConfig {
    harvest_core::config::build_app_config(|key| match key {
        "HARVEST_ORDER_LIST_URL" => Ok("https://source.test/order/page".to_owned()),
        "HARVEST_ORDER_DETAIL_URL" => Ok("https://source.test/order/detail".to_owned()),
        _ => Err(std::env::VarError::NotPresent),
    })
    .expect("expected valid config")
}

#[test]
fn parses_run_with_date_range() {
    let cli = Cli::try_parse_from([
        "harvest",
        "run",
        "--start",
        "2025-01-01",
        "--end",
        "2025-01-03",
        "--settlement-status",
        "settled",
    ])
    .expect("expected valid cli args");

    let Some(Commands::Run {
        start,
        end,
        settlement_status,
    }) = cli.command
    else {
        panic!("expected run command");
    };
    assert_eq!(start, NaiveDate::from_ymd_opt(2025, 1, 1));
    assert_eq!(end, NaiveDate::from_ymd_opt(2025, 1, 3));
    assert_eq!(settlement_status.as_deref(), Some("settled"));
}

#[test]
fn parses_run_without_arguments() {
    let cli = Cli::try_parse_from(["harvest", "run"]).expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Some(Commands::Run {
            start: None,
            end: None,
            settlement_status: None
        })
    ));
}

#[test]
fn rejects_malformed_date() {
    assert!(Cli::try_parse_from(["harvest", "run", "--start", "01/02/2025"]).is_err());
}

#[test]
fn parses_replay_and_auth_status() {
    let cli = Cli::try_parse_from(["harvest", "replay"]).expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::Replay)));

    let cli = Cli::try_parse_from(["harvest", "auth-status"]).expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::AuthStatus)));
}

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["harvest"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn settled_shorthand_maps_to_status_code() {
    assert_eq!(commands::settlement_filter(Some("settled")).as_deref(), Some("2"));
    assert_eq!(commands::settlement_filter(Some("1")).as_deref(), Some("1"));
    assert_eq!(commands::settlement_filter(Some("  ")), None);
    assert_eq!(commands::settlement_filter(None), None);
}

#[test]
fn query_uses_configured_filters() {
    let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let query = commands::build_query(&config(), day, day, Some("settled")).unwrap();
    assert_eq!(query.filter.country_codes, vec!["GH".to_owned()]);
    assert_eq!(query.filter.settlement_status.as_deref(), Some("2"));
    assert_eq!(query.range.end_ms - query.range.start_ms, 86_399_000);

    let earlier = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
    assert!(commands::build_query(&config(), day, earlier, None).is_err());
}

#[test]
fn static_bundle_requires_a_token() {
    let mut config = config();
    assert!(commands::static_bundle(&config).is_none());

    config.static_token = Some("tok".to_owned());
    config.static_merchant_id = Some("m-1".to_owned());
    let bundle = commands::static_bundle(&config).unwrap();
    assert_eq!(bundle.token, "tok");
    assert_eq!(bundle.merchant_id, "m-1");
}
