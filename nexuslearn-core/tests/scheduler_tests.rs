use chrono::{DateTime, Duration, TimeZone, Utc};
use nexuslearn_core::{
    apply_review, schedule, schedule_label, Confidence, Flashcard, InvalidConfidence,
};

fn jan1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

#[test]
fn again_resets_from_any_level() {
    for level in [0, 1, 3, 17, 1000] {
        let s = schedule(level, Confidence::Again, jan1());
        assert_eq!(s.new_level, 0);
        assert_eq!(s.next_review_at, jan1() + Duration::minutes(5));
    }
}

#[test]
fn hard_steps_back_one_level_and_floors_at_zero() {
    for level in 1..20u32 {
        let s = schedule(level, Confidence::Hard, jan1());
        assert_eq!(s.new_level, level - 1);
        assert_eq!(s.next_review_at, jan1() + Duration::hours(12));
    }
    let s = schedule(0, Confidence::Hard, jan1());
    assert_eq!(s.new_level, 0);
    assert_eq!(s.next_review_at, jan1() + Duration::hours(12));
}

#[test]
fn good_delay_uses_the_resulting_level() {
    for level in 0..20u32 {
        let s = schedule(level, Confidence::Good, jan1());
        assert_eq!(s.new_level, level + 1);
        assert_eq!(
            s.next_review_at,
            jan1() + Duration::days(2 * i64::from(level + 1))
        );
    }
}

#[test]
fn easy_delay_uses_the_resulting_level() {
    for level in 0..20u32 {
        let s = schedule(level, Confidence::Easy, jan1());
        assert_eq!(s.new_level, level + 2);
        assert_eq!(
            s.next_review_at,
            jan1() + Duration::days(4 * i64::from(level + 2))
        );
    }
}

#[test]
fn every_branch_moves_strictly_forward() {
    for level in [0, 1, 2, 50] {
        for c in Confidence::ALL {
            assert!(schedule(level, c, jan1()).next_review_at > jan1());
        }
    }
}

#[test]
fn identical_inputs_give_identical_outputs() {
    for c in Confidence::ALL {
        assert_eq!(schedule(4, c, jan1()), schedule(4, c, jan1()));
    }
}

#[test]
fn literal_scenarios() {
    let s = schedule(0, Confidence::Good, jan1());
    assert_eq!((s.new_level, s.next_review_at), (1, at(2024, 1, 3, 0, 0)));

    let s = schedule(3, Confidence::Again, jan1());
    assert_eq!((s.new_level, s.next_review_at), (0, at(2024, 1, 1, 0, 5)));

    let s = schedule(2, Confidence::Easy, jan1());
    assert_eq!((s.new_level, s.next_review_at), (4, at(2024, 1, 17, 0, 0)));

    let s = schedule(0, Confidence::Hard, jan1());
    assert_eq!((s.new_level, s.next_review_at), (0, at(2024, 1, 1, 12, 0)));
}

#[test]
fn unknown_label_is_rejected() {
    assert_eq!(
        schedule_label(2, "maybe", jan1()),
        Err(InvalidConfidence("maybe".to_string()))
    );
    let s = schedule_label(2, "easy", jan1()).unwrap();
    assert_eq!(s.new_level, 4);
}

#[test]
fn review_sequence_on_a_card() {
    let mut card = Flashcard::new("2 + 2", "4", jan1());
    assert_eq!(card.mastery_level, 0);
    assert!(card.is_due(jan1()));

    apply_review(&mut card, Confidence::Good, jan1());
    assert_eq!(card.mastery_level, 1);
    assert!(!card.is_due(jan1() + Duration::days(1)));

    let now = card.next_review_at;
    apply_review(&mut card, Confidence::Easy, now);
    assert_eq!(card.mastery_level, 3);
    assert_eq!(card.next_review_at, now + Duration::days(12));

    apply_review(&mut card, Confidence::Again, now);
    assert_eq!(card.mastery_level, 0);
    assert_eq!(card.next_review_at, now + Duration::minutes(5));
}
