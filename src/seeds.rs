//! Built-in demo deck, used when no DECK_CONFIG_PATH is given so the server
//! is useful out of the box.

use chrono::NaiveDate;

use crate::config::{DeckConfig, PrereqSeed, SeedCatalogue};
use crate::domain::{Badge, Campaign, Course, Enrolment, Profile, Quest, Rank, Semester};

pub const DEMO_TEACHER: u64 = 1;
pub const DEMO_STUDENT: u64 = 2;

fn quest(id: u64, name: &str, xp: u32, campaign: Option<u64>) -> Quest {
  let mut q = Quest::new(name, xp);
  q.id = id;
  q.campaign_id = campaign;
  q
}

fn prereq(parent: &str, main: &str) -> PrereqSeed {
  PrereqSeed {
    parent: parent.into(),
    main: main.into(),
    main_count: 1,
    main_invert: false,
    alt: None,
    alt_count: 1,
    alt_invert: false,
  }
}

/// A small deck: one semester and course, a teacher and an enrolled student,
/// an orientation quest gating a short campaign, a badge and three ranks.
pub fn demo_catalogue() -> SeedCatalogue {
  let mut welcome = quest(10, "Welcome to the deck", 5, None);
  welcome.verification_required = false;
  welcome.blocking = true;
  welcome.hideable = false;
  welcome.available_outside_course = true;

  let mut practice = quest(13, "Practice log", 2, Some(20));
  practice.max_repeats = -1;
  practice.hours_between_repeats = 24;

  let mut unit = Campaign::new("Getting started");
  unit.id = 20;

  let mut badge = Badge::new("Starter", 10);
  badge.id = 30;

  SeedCatalogue {
    semesters: vec![Semester {
      id: 1,
      first_day: NaiveDate::default(),
      last_day: NaiveDate::MAX,
      closed: false,
    }],
    ranks: vec![
      Rank { id: 40, name: "Novice".into(), xp: 0, icon: None },
      Rank { id: 41, name: "Apprentice".into(), xp: 20, icon: None },
      Rank { id: 42, name: "Adept".into(), xp: 60, icon: None },
    ],
    campaigns: vec![unit],
    quests: vec![
      welcome,
      quest(11, "Set up your workstation", 10, Some(20)),
      quest(12, "First program", 15, Some(20)),
      practice,
    ],
    badges: vec![badge],
    courses: vec![Course { id: 50, title: "Computer Science".into(), xp_for_100_percent: 1000, active: true }],
    users: vec![Profile::staff(DEMO_TEACHER, "teacher"), Profile::student(DEMO_STUDENT, "student")],
    enrolments: vec![Enrolment {
      id: 60,
      user_id: DEMO_STUDENT,
      semester_id: 1,
      course_id: Some(50),
      group_id: None,
      xp_adjustment: 0,
      xp_adjust_explanation: None,
    }],
    prereqs: vec![
      prereq("quest:11", "quest:10"),
      prereq("quest:12", "quest:11"),
      prereq("quest:13", "quest:12"),
      prereq("badge:30", "campaign:20"),
    ],
    ..SeedCatalogue::default()
  }
}

/// Configuration for the demo deck.
pub fn demo_config() -> DeckConfig {
  let mut cfg = DeckConfig { catalogue: demo_catalogue(), ..DeckConfig::default() };
  cfg.settings.active_semester = Some(1);
  cfg
}
