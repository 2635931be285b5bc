//! End-to-end challenge flows over an on-disk database

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::NaiveDate;
use daily_hue::collaborators::{ItemEffectSource, ItemMetadata};
use daily_hue::db::{
    attempts, leaderboard, ChallengeDb, EconomyDelta, UserEconomy, UserKey, DEFAULT_BUSY_TIMEOUT,
};
use daily_hue::services::{
    EventBus, Services, SettleOutcome, SubmissionResult, SubmitOutcome,
};
use daily_hue::{AttemptRules, ChallengeError, Config, Rgb};
use tempfile::TempDir;

const BLACK: Rgb = Rgb::new(0, 0, 0);

fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

fn open(dir: &TempDir) -> Services {
    let config = Config {
        storage_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let db = Arc::new(ChallengeDb::open(&config.db_path(), DEFAULT_BUSY_TIMEOUT).unwrap());
    Services::new(db, AttemptRules::default(), Arc::new(EventBus::new()))
}

/// A gray that scores exactly `score` against a black target
fn gray_for(score: u8) -> Rgb {
    let v = match score {
        100 => 0,
        95 => 13,
        90 => 25,
        60 => 102,
        40 => 153,
        10 => 230,
        0 => 255,
        other => panic!("no gray prepared for {}", other),
    };
    Rgb::new(v, v, v)
}

fn publish_black(services: &Services, date: NaiveDate) {
    services.challenge.publish_target(date, Some("Black"), BLACK).unwrap();
}

fn seed_points(services: &Services, user_id: &str, points: i64) {
    services
        .accounts
        .update_economy(user_id, &|_| EconomyDelta { points, credits: 0, levels: 0 })
        .unwrap();
}

fn accepted(outcome: SubmitOutcome) -> SubmissionResult {
    match outcome {
        SubmitOutcome::Accepted(result) => result,
        other => panic!("expected accepted submission, got {:?}", other),
    }
}

#[test]
fn concurrent_submissions_never_exceed_cap() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let date = day("2024-10-01");
    publish_black(&services, date);

    let workers = 12;
    let barrier = Barrier::new(workers);

    let outcomes: Vec<SubmitOutcome> = thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    services
                        .challenge
                        .submit_attempt("racer", date, gray_for(40))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut numbers: Vec<u32> = outcomes
        .iter()
        .filter_map(|o| match o {
            SubmitOutcome::Accepted(r) => Some(r.attempt_number),
            _ => None,
        })
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, SubmitOutcome::AttemptLimitReached { max_attempts: 5, .. }))
        .count();
    assert_eq!(rejected, workers - 5);
}

#[test]
fn separate_connections_share_one_budget() {
    let dir = TempDir::new().unwrap();
    let first = open(&dir);
    let second = open(&dir);
    let date = day("2024-10-02");
    publish_black(&first, date);

    let per_side = 6;
    let barrier = Barrier::new(per_side * 2);

    let admitted: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..per_side * 2)
            .map(|i| {
                let services = if i % 2 == 0 { &first } else { &second };
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    matches!(
                        services.challenge.submit_attempt("twin", date, gray_for(60)).unwrap(),
                        SubmitOutcome::Accepted(_)
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum()
    });
    assert_eq!(admitted, 5);

    let key = UserKey::new("twin", date);
    let position = first
        .db
        .with_conn(|conn| attempts::ledger_position(conn, &key))
        .unwrap();
    assert_eq!((position.count, position.max_number), (5, 5));
}

#[test]
fn exhausting_the_budget_settles_once() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let date = day("2024-10-03");
    publish_black(&services, date);

    let scores = [40, 95, 95, 10, 60];
    let mut results = Vec::new();
    for score in scores {
        results.push(accepted(
            services.challenge.submit_attempt("ana", date, gray_for(score)).unwrap(),
        ));
    }

    let observed: Vec<u8> = results.iter().map(|r| r.score).collect();
    assert_eq!(observed, scores);
    assert!(results[1].is_new_best);
    assert!(!results[2].is_new_best);
    assert!(results[..4].iter().all(|r| r.settlement.is_none()));

    let last = &results[4];
    assert_eq!(last.attempts_left, 0);
    assert!(last.message.ends_with("No more attempts left for today."));
    match last.settlement {
        Some(SettleOutcome::Settled(day)) => {
            assert_eq!(day.award.points_awarded, 95);
            assert_eq!(day.award.credits_awarded, 48);
            assert_eq!(day.award.levels_gained, 0);
        }
        ref other => panic!("expected settlement, got {:?}", other),
    }

    let entry = services
        .leaderboard
        .entry(&UserKey::new("ana", date))
        .unwrap()
        .unwrap();
    assert_eq!((entry.best_score, entry.attempts_used), (95, 2));

    // Retrying the final submission is rejected and does not pay again
    let retry = services.challenge.submit_attempt("ana", date, gray_for(95)).unwrap();
    assert!(matches!(retry, SubmitOutcome::AttemptLimitReached { max_attempts: 5, attempts_used: 5 }));
    assert_eq!(
        services.settlement.settle(&UserKey::new("ana", date)).unwrap(),
        SettleOutcome::AlreadySettled
    );
    assert_eq!(
        services.accounts.get_economy("ana").unwrap(),
        UserEconomy { points: 95, level: 1, credits: 48 }
    );
}

#[test]
fn crossing_a_thousand_points_levels_up() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let date = day("2024-10-04");
    publish_black(&services, date);
    seed_points(&services, "ben", 950);

    let mut last = None;
    for score in [95, 10, 10, 10, 10] {
        last = Some(accepted(
            services.challenge.submit_attempt("ben", date, gray_for(score)).unwrap(),
        ));
    }

    match last.and_then(|r| r.settlement) {
        Some(SettleOutcome::Settled(day)) => {
            assert_eq!(day.award.levels_gained, 1);
            assert_eq!(day.economy, UserEconomy { points: 1045, level: 2, credits: 48 });
        }
        other => panic!("expected settlement, got {:?}", other),
    }
}

#[test]
fn settling_several_days_at_once_levels_up_once() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let dates = [day("2024-11-01"), day("2024-11-02"), day("2024-11-03")];
    for date in dates {
        publish_black(&services, date);
    }
    seed_points(&services, "bea", 950);

    let barrier = Barrier::new(dates.len());
    thread::scope(|s| {
        for date in dates {
            let services = &services;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for _ in 0..5 {
                    services.challenge.submit_attempt("bea", date, gray_for(60)).unwrap();
                }
            });
        }
    });

    // 950 + 3 * 60 = 1130: one milestone.
    assert_eq!(
        services.accounts.get_economy("bea").unwrap(),
        UserEconomy { points: 1130, level: 2, credits: 90 }
    );
}

#[test]
fn grants_raise_the_cap_up_to_ten() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let date = day("2024-10-05");
    publish_black(&services, date);

    let two = ItemMetadata(serde_json::json!({"effect_type": "extra_attempt", "extra_attempts": 2}));
    let used = services.challenge.use_extra_attempt_item("cat", date, &two).unwrap();
    assert_eq!((used.total_extra_attempts, used.max_attempts), (2, 7));

    let lots = ItemMetadata(serde_json::json!({"effect_type": "extra_attempt", "extra_attempts": 9}));
    let used = services.challenge.use_extra_attempt_item("cat", date, &lots).unwrap();
    assert_eq!((used.total_extra_attempts, used.max_attempts), (11, 10));

    for n in 1..=10 {
        let result = accepted(services.challenge.submit_attempt("cat", date, gray_for(60)).unwrap());
        assert_eq!(result.attempt_number, n);
        assert_eq!(result.max_attempts, 10);
    }
    assert!(matches!(
        services.challenge.submit_attempt("cat", date, gray_for(60)).unwrap(),
        SubmitOutcome::AttemptLimitReached { max_attempts: 10, attempts_used: 10 }
    ));
}

/// Inventory holding `stock` copies of an item worth `effect` attempts
struct Inventory {
    effect: u32,
    stock: AtomicU32,
    offline: bool,
}

impl Inventory {
    fn new(effect: u32, stock: u32) -> Self {
        Self { effect, stock: AtomicU32::new(stock), offline: false }
    }
}

impl ItemEffectSource for Inventory {
    fn extra_attempt_effect(&self, _user_id: &str) -> Result<u32, ChallengeError> {
        Ok(self.effect)
    }

    fn consume(&self, _user_id: &str) -> Result<(), ChallengeError> {
        if self.offline {
            return Err(ChallengeError::TransientStore("inventory offline".into()));
        }
        self.stock.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn items_are_only_spent_on_a_successful_grant() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let date = day("2024-10-09");
    let key = UserKey::new("eli", date);

    let dud = Inventory::new(0, 1);
    assert!(matches!(
        services.challenge.use_extra_attempt_item("eli", date, &dud),
        Err(ChallengeError::InvalidInput(_))
    ));
    assert_eq!(dud.stock.load(Ordering::SeqCst), 1);

    let unreachable = Inventory { offline: true, ..Inventory::new(2, 1) };
    assert!(services.challenge.use_extra_attempt_item("eli", date, &unreachable).is_err());
    assert_eq!(unreachable.stock.load(Ordering::SeqCst), 1);
    assert_eq!(services.modifiers.get(&key).unwrap(), 0);

    let good = Inventory::new(2, 1);
    let used = services.challenge.use_extra_attempt_item("eli", date, &good).unwrap();
    assert_eq!(used.total_extra_attempts, 2);
    assert_eq!(good.stock.load(Ordering::SeqCst), 0);
}

#[test]
fn grant_after_settlement_does_not_pay_twice() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let date = day("2024-10-06");
    publish_black(&services, date);

    for _ in 0..5 {
        services.challenge.submit_attempt("dee", date, gray_for(60)).unwrap();
    }
    services
        .modifiers
        .grant(&UserKey::new("dee", date), 1)
        .unwrap();

    let sixth = accepted(services.challenge.submit_attempt("dee", date, gray_for(95)).unwrap());
    assert_eq!((sixth.attempt_number, sixth.max_attempts), (6, 6));
    assert_eq!(sixth.settlement, Some(SettleOutcome::AlreadySettled));
    assert_eq!(services.accounts.get_economy("dee").unwrap().points, 60);
}

#[test]
fn ranking_prefers_score_then_fewer_attempts() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let date = day("2024-10-07");
    publish_black(&services, date);

    let plays: [(&str, &[u8]); 3] = [
        ("A", &[40, 40, 90]),
        ("B", &[40, 90]),
        ("C", &[40, 40, 40, 40, 95]),
    ];
    for (user, scores) in plays {
        for score in scores {
            services.challenge.submit_attempt(user, date, gray_for(*score)).unwrap();
        }
    }

    let board = services.challenge.get_leaderboard(date, 10, 0).unwrap();
    let order: Vec<_> = board
        .iter()
        .map(|e| (e.rank, e.user_id.as_str(), e.best_score, e.attempts_used))
        .collect();
    assert_eq!(
        order,
        vec![(1, "C", 95, 5), (2, "B", 90, 2), (3, "A", 90, 3)]
    );
    assert_eq!(services.challenge.user_rank("A", date).unwrap(), Some(3));
    assert_eq!(services.challenge.get_leaderboard(date, 10, 0).unwrap(), board);
}

#[test]
fn leaderboard_matches_ledger_max() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let date = day("2024-10-08");
    publish_black(&services, date);

    for score in [60, 10, 90, 90, 40] {
        services.challenge.submit_attempt("eve", date, gray_for(score)).unwrap();
    }

    let key = UserKey::new("eve", date);
    let (ledger_best, entry) = services
        .db
        .with_conn(|conn| {
            Ok((
                attempts::best_from_ledger(conn, &key)?,
                leaderboard::get_entry(conn, &key)?,
            ))
        })
        .unwrap();
    let entry = entry.unwrap();
    assert_eq!(ledger_best, Some((entry.best_score, entry.attempts_used)));
    assert_eq!(ledger_best, Some((90, 3)));
}

#[test]
fn unpublished_day_is_reported() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let date = day("2024-10-09");

    let outcome = services.challenge.submit_attempt("fay", date, BLACK).unwrap();
    assert_eq!(outcome, SubmitOutcome::NotPublished { date });
    assert_eq!(services.db.stats().unwrap().attempt_count, 0);
}

#[test]
fn republishing_keeps_the_first_target() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let date = day("2024-10-10");

    let first = services.challenge.publish_target(date, Some("Black"), BLACK).unwrap();
    let again = services
        .challenge
        .publish_target(date, Some("White"), Rgb::new(255, 255, 255))
        .unwrap();
    assert!(first.created);
    assert!(!again.created);
    assert_eq!(again.target.color, BLACK);
}

#[test]
fn reset_clears_the_day_but_keeps_grants() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let date = day("2024-10-11");
    publish_black(&services, date);

    services.modifiers.grant(&UserKey::new("gus", date), 1).unwrap();
    for _ in 0..6 {
        services.challenge.submit_attempt("gus", date, gray_for(90)).unwrap();
    }

    let reset = services.challenge.reset_user_day("gus", date).unwrap();
    assert_eq!(reset.attempts_deleted, 6);
    assert!(reset.leaderboard_cleared);
    assert!(reset.settlement_cleared);

    let summary = services.challenge.get_user_day_summary("gus", date).unwrap();
    assert!(summary.attempts.is_empty());
    assert_eq!(summary.extra_attempts, 1);
    assert_eq!(summary.attempts_left, 6);
    assert!(summary.settlement.is_none());

    let first = accepted(services.challenge.submit_attempt("gus", date, gray_for(40)).unwrap());
    assert_eq!(first.attempt_number, 1);
}

#[test]
fn history_spans_days() {
    let dir = TempDir::new().unwrap();
    let services = open(&dir);
    let (d1, d2) = (day("2024-10-12"), day("2024-10-13"));
    publish_black(&services, d1);
    publish_black(&services, d2);

    services.challenge.submit_attempt("hu", d1, gray_for(40)).unwrap();
    services.challenge.submit_attempt("hu", d2, gray_for(60)).unwrap();
    services.challenge.submit_attempt("hu", d2, gray_for(90)).unwrap();

    let history = services.challenge.get_user_history("hu", 50).unwrap();
    let seen: Vec<_> = history.iter().map(|a| (a.date, a.attempt_number)).collect();
    assert_eq!(seen, vec![(d2, 1), (d2, 2), (d1, 1)]);
}
