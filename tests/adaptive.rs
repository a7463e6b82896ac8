//! Tier transitions seen through the public `Pattern` API.

mod common;

use common::init_tracing;
use rejit::{BackendKind, ControllerState, EngineConfig, Hooks, Pattern};

fn speculative(backend: BackendKind) -> Pattern {
    let config = EngineConfig::default()
        .with_threshold(100)
        .with_speculative(true)
        .with_backend(backend);
    Pattern::with_config("a(bcde)?f", None, config).expect("pattern")
}

#[test]
fn test_speculation_is_invalidated_once() {
    init_tracing();
    for backend in BackendKind::ALL {
        let pattern = speculative(backend);

        for _ in 0..200 {
            let caps = pattern.captures("af").expect("search").expect("match");
            assert_eq!(caps.as_str(), "af");
            assert!(caps.get(1).is_none());
        }
        assert_eq!(pattern.hooks(), Hooks { compiled: 1, deoptimized: 0 }, "{}", backend);
        assert_eq!(pattern.state(), ControllerState::Speculative(backend));

        for _ in 0..200 {
            let caps = pattern.captures("abcdef").expect("search").expect("match");
            assert_eq!(caps.get(1).map(|m| m.as_str()), Some("bcde"));
        }
        assert_eq!(pattern.hooks(), Hooks { compiled: 2, deoptimized: 1 }, "{}", backend);
        assert_eq!(pattern.state(), ControllerState::Speculative(backend));
    }
}

#[test]
fn test_new_speculation_covers_both_inputs_after_mixed_profile() {
    init_tracing();
    let config = EngineConfig::default()
        .with_threshold(4)
        .with_speculative(true)
        .with_backend(BackendKind::Interpreter);
    let pattern = Pattern::with_config("a(bcde)?f", None, config).expect("pattern");
    for subject in ["af", "abcdef", "af", "abcdef"] {
        assert!(pattern.is_match(subject).expect("search"));
    }
    for _ in 0..50 {
        assert!(pattern.is_match("af").expect("search"));
        assert!(pattern.is_match("abcdef").expect("search"));
    }
    assert_eq!(pattern.hooks(), Hooks { compiled: 1, deoptimized: 0 });
}

#[test]
fn test_non_speculative_never_deoptimizes() {
    init_tracing();
    let config = EngineConfig::default().with_threshold(10);
    let pattern = Pattern::with_config("a(bcde)?f", None, config).expect("pattern");
    for _ in 0..20 {
        assert!(pattern.is_match("af").expect("search"));
    }
    for _ in 0..20 {
        assert!(pattern.is_match("abcdef").expect("search"));
    }
    assert_eq!(pattern.hooks(), Hooks { compiled: 1, deoptimized: 0 });
    assert_eq!(pattern.state(), ControllerState::Compiled(BackendKind::Native));
}

#[test]
fn test_unprofiled_failure_path_deoptimizes() {
    init_tracing();
    let pattern = speculative(BackendKind::Closure);
    for _ in 0..100 {
        pattern.is_match("af").expect("search");
    }
    // Every profiled call matched at the first cursor, so failing the first
    // read is a path the compiled code never saw.
    assert!(!pattern.is_match("zzz").expect("search"));
    assert_eq!(pattern.hooks(), Hooks { compiled: 1, deoptimized: 1 });
    assert_eq!(pattern.state(), ControllerState::Interpreting { budget: 99 });
}

#[test]
fn test_config_file_drives_the_controller() {
    init_tracing();
    let config = EngineConfig::from_toml_str(
        r#"
        [engine]
        threshold = 1
        backend = "closure"
        optimize_layout = true
        "#,
    )
    .expect("config");
    let pattern = Pattern::with_config("x+", None, config).expect("pattern");
    assert!(pattern.is_match("axxb").expect("search"));
    assert_eq!(pattern.state(), ControllerState::Compiled(BackendKind::Closure));
    assert_eq!(pattern.find("axxb").expect("search").map(|m| m.range()), Some(1..3));
}
