// tests/config_load.rs
use std::{env, fs};

use timeline_digest::config::digest::{Driver, Provider, Strategy, ENV_DIGEST_CONFIG_PATH, ENV_TEST_MODE};
use timeline_digest::pipeline::Pipeline;
use timeline_digest::DigestConfig;

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // Isolate CWD so the repo's own config/ is not picked up.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_DIGEST_CONFIG_PATH);

    // 1) Nothing on disk -> built-in defaults
    let cfg = DigestConfig::load_default().unwrap();
    assert_eq!(cfg.timeline.account, "financialjuice");
    assert_eq!(cfg.timeline.lookback_hours, 24);
    assert_eq!(cfg.output.timezone, "Europe/Zurich");

    // 2) Fallback ./config/digest.toml
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(
        tmp.path().join("config/digest.toml"),
        "[timeline]\naccount = \"@MarketNews\"\nlookback_hours = 6\n",
    )
    .unwrap();
    let cfg = DigestConfig::load_default().unwrap();
    assert_eq!(cfg.timeline.account, "MarketNews");
    assert_eq!(cfg.timeline.lookback_hours, 6);

    // 3) Env path wins
    let p_env = tmp.path().join("other.toml");
    fs::write(&p_env, "[summary]\nprovider = \"openai\"\nstrategy = \"chunked\"\n").unwrap();
    env::set_var(ENV_DIGEST_CONFIG_PATH, &p_env);
    let cfg = DigestConfig::load_default().unwrap();
    assert_eq!(cfg.summary.provider, Provider::OpenAi);
    assert_eq!(cfg.summary.strategy, Strategy::Chunked);
    assert_eq!(cfg.timeline.lookback_hours, 24);

    // 4) Env path pointing nowhere is an error, not a silent fallback
    env::set_var(ENV_DIGEST_CONFIG_PATH, tmp.path().join("missing.toml"));
    assert!(DigestConfig::load_default().is_err());

    env::remove_var(ENV_DIGEST_CONFIG_PATH);
    env::set_current_dir(old).unwrap();
}

#[serial_test::serial]
#[test]
fn invalid_values_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("bad.toml");

    fs::write(&p, "[output]\ntimezone = \"Mars/Olympus\"\n").unwrap();
    let err = DigestConfig::load_from_file(&p).unwrap_err();
    assert!(format!("{err:#}").contains("Mars/Olympus"));

    fs::write(&p, "[timeline]\nlookback_hours = 0\n").unwrap();
    assert!(DigestConfig::load_from_file(&p).is_err());

    fs::write(&p, "[browser]\ndriver = \"fixture\"\n").unwrap();
    assert!(DigestConfig::load_from_file(&p).is_err());

    fs::write(&p, "[summary]\ntimeout_secs = 0\n").unwrap();
    let err = DigestConfig::load_from_file(&p).unwrap_err();
    assert!(err.to_string().contains("timeout_secs"));

    fs::write(&p, "[browser]\nscroll_wait_ms = 0\n").unwrap();
    let err = DigestConfig::load_from_file(&p).unwrap_err();
    assert!(err.to_string().contains("scroll_wait_ms"));
}

#[serial_test::serial]
#[test]
fn api_key_comes_from_environment_only_when_asked() {
    env::remove_var(ENV_TEST_MODE);
    let mut cfg = DigestConfig::default();
    assert_eq!(cfg.summary.api_key, "ENV");

    env::set_var("GOOGLE_API_KEY", "  g-key  ");
    assert_eq!(cfg.summary.resolve_api_key().as_deref(), Some("g-key"));

    env::remove_var("GOOGLE_API_KEY");
    assert_eq!(cfg.summary.resolve_api_key(), None);

    cfg.summary.provider = Provider::OpenAi;
    env::set_var("OPENAI_API_KEY", "o-key");
    assert_eq!(cfg.summary.resolve_api_key().as_deref(), Some("o-key"));
    assert_eq!(cfg.summary.model(), "gpt-4o-mini");
    env::remove_var("OPENAI_API_KEY");
}

#[serial_test::serial]
#[test]
fn test_mode_forces_the_mock_backend() {
    env::set_var(ENV_TEST_MODE, "mock");
    let cfg = DigestConfig::default();
    assert_eq!(cfg.summary.effective_provider(), Provider::Mock);
    assert_eq!(cfg.summary.resolve_api_key().as_deref(), Some("mock"));
    env::remove_var(ENV_TEST_MODE);
    assert_eq!(cfg.summary.effective_provider(), Provider::Gemini);
}

#[serial_test::serial]
#[test]
fn fixture_driver_is_wired_from_config() {
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("digest.toml");
    let fixture = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/timeline.json");
    fs::write(
        &p,
        format!("[browser]\ndriver = \"fixture\"\nfixture_path = \"{fixture}\"\n[summary]\nprovider = \"mock\"\n"),
    )
    .unwrap();
    let cfg = DigestConfig::load_from_file(&p).unwrap();
    assert_eq!(cfg.browser.driver, Driver::Fixture);
    assert!(Pipeline::from_config(cfg).is_ok());
}
