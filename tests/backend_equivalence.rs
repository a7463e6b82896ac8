//! Every executor agrees with the others and with the `regex` crate.
//!
//! Subjects are ASCII so byte offsets and codepoint offsets coincide, and
//! the ASCII `\d \w \s` classes agree with the oracle's Unicode ones.

mod common;

use common::{init_tracing, oracle, program, run_backend, run_bytecode};
use rejit::automaton::{dfa, nfa};
use rejit::backend::{BackendKind, Outcome};
use rejit::bytecode::compile;
use rejit::syntax::parse;
use rejit::{EngineConfig, Pattern};

const CASES: &[(&str, &[&str])] = &[
    ("abc", &["abc", "xabcx", "ab", ""]),
    ("a|ab", &["ab", "b"]),
    ("ab|a", &["ab", "a"]),
    ("(a|ab)(c|bcd)(d*)", &["abcd", "acd", "abd"]),
    ("a(b|c)*d", &["ad", "abcbcd", "abce"]),
    ("colou?r", &["color", "colour", "colouur"]),
    ("x+y", &["xxxy", "y", "xyxy"]),
    ("(\\d+)-(\\d+)", &["tel 555-1234", "5-", "-5"]),
    ("\\s*(\\w+)\\s*=\\s*(\\w+)", &["  width = 42;", "k=v", "=v"]),
    ("[a-c]{2,}", &["zzabcab", "a", "cc"]),
    ("[^,]+", &[",,abc,", ",,,"]),
    ("\\D\\W\\S", &["1a!b", "a b", "ab "]),
    ("^(\\d{3})-(\\d{4})$", &["555-1234", "555-12345", "x555-1234"]),
    ("a{3}", &["aa", "aaa", "aaaa"]),
    ("a{2,4}", &["a", "aaaaa"]),
    ("(a{1,2}){2}", &["aaa", "a"]),
    ("^$", &["", "a"]),
    ("$", &["abc", ""]),
    ("^a|b$", &["ca", "cab", "ac"]),
    ("a.c", &["a\nc", "abc", "ac"]),
    ("(?:ab)+c", &["ababc", "abc", "ac"]),
    ("(?<y>\\d{4})-(?<m>\\d\\d)", &["on 2024-06-01"]),
    ("[\\w.]+@[\\w.]+", &["mail bob@example.org now"]),
    ("", &["", "abc"]),
];

fn check(source: &str, subject: &str) {
    let p = program(source);
    let expected = run_bytecode(&p, subject);

    let oracle = oracle(source, subject);
    match (&expected.0, &oracle) {
        (Outcome::Match(_), Some(slots)) => assert_eq!(&expected.1, slots, "/{}/ on {:?}", source, subject),
        (Outcome::NoMatch, None) => {}
        (got, want) => panic!("/{}/ on {:?}: {:?} vs oracle {:?}", source, subject, got, want),
    }

    for kind in BackendKind::ALL {
        assert_eq!(
            run_backend(&p, kind, subject),
            expected,
            "/{}/ on {:?} with {}",
            source,
            subject,
            kind
        );
    }
}

#[test]
fn test_backends_agree_with_oracle() {
    init_tracing();
    for (source, subjects) in CASES {
        for subject in *subjects {
            check(source, subject);
        }
    }
}

#[test]
fn test_lookahead_agrees_across_backends() {
    init_tracing();
    for (source, subject, span) in [
        ("x(?=yz)", "xyxyz", Some((2, 3))),
        ("x(?!y)", "xyxz", Some((2, 3))),
        ("\\w+(?=!)", "hey you!", Some((4, 7))),
        ("a(?=b)", "ac", None),
    ] {
        let p = program(source);
        let (outcome, _) = run_bytecode(&p, subject);
        let expected = match span {
            Some((start, end)) => Outcome::Match(rejit::Span { start, end }),
            None => Outcome::NoMatch,
        };
        assert_eq!(outcome, expected, "/{}/", source);
        for kind in BackendKind::ALL {
            assert_eq!(run_backend(&p, kind, subject).0, expected, "/{}/ with {}", source, kind);
        }
    }
}

#[test]
fn test_non_ascii_subjects() {
    init_tracing();
    let p = program("é+ü?");
    let expected = run_bytecode(&p, "caféé!");
    assert_eq!(expected.0, Outcome::Match(rejit::Span { start: 3, end: 5 }));
    for kind in BackendKind::ALL {
        assert_eq!(run_backend(&p, kind, "caféé!"), expected);
    }
}

/// A DFA program decides the match and its start; the end is the first
/// accepting position.
#[test]
fn test_determinized_program_finds_same_matches() {
    init_tracing();
    for (source, subjects) in CASES {
        if source.contains('(') {
            continue;
        }
        let nfa = nfa::build(&parse(source, None).expect("parse")).expect("build");
        let dfa = dfa::determinize(&nfa, dfa::DEFAULT_MAX_STATES).expect("determinize");
        let p = compile(&dfa).expect("compile");
        for subject in *subjects {
            let outcome = run_bytecode(&p, subject).0;
            let want = oracle(source, subject);
            assert_eq!(
                matches!(outcome, Outcome::Match(_)),
                want.is_some(),
                "/{}/ on {:?}",
                source,
                subject
            );
            if let (Outcome::Match(span), Some(slots)) = (outcome, want) {
                assert_eq!(Some(span.start), slots[0], "/{}/ on {:?}", source, subject);
            }
            for kind in BackendKind::ALL {
                assert_eq!(run_backend(&p, kind, subject).0, outcome);
            }
        }
    }
}

#[test]
fn test_determinized_pattern_reports_oracle_captures() {
    init_tracing();
    let config = EngineConfig::default()
        .with_threshold(u32::MAX)
        .with_determinize(true);
    for (source, subjects) in CASES {
        let pattern = Pattern::with_config(source, None, config.clone()).expect("pattern");
        for subject in *subjects {
            let got = pattern.captures(subject).expect("search").map(|caps| {
                caps.iter()
                    .flat_map(|m| [m.map(|m| m.start()), m.map(|m| m.end())])
                    .collect::<Vec<_>>()
            });
            assert_eq!(got, oracle(source, subject), "/{}/ on {:?}", source, subject);
        }
    }
}
