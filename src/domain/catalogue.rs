//! Catalogue entities authored by teachers: quests, campaigns, badges, ranks,
//! and the course/semester scaffolding that scopes XP.
//!
//! Dates and times on quests are deck-local wall-clock values; callers pass a
//! deck-local `NaiveDateTime` for "now" when asking whether something is active.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BadgeId, CampaignId, CourseId, GroupId, QuestId, RankId, SemesterId, UserId};

/// Max repeats value meaning "repeat forever".
pub const UNLIMITED: i32 = -1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Quest {
    #[serde(default)]
    pub id: QuestId,
    #[serde(default = "Uuid::new_v4")]
    pub import_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub submission_details: String,
    #[serde(default)]
    pub instructor_notes: String,
    #[serde(default)]
    pub xp: u32,
    /// When set, `xp` is a floor and the student proposes a value on completion.
    #[serde(default)]
    pub xp_can_be_entered_by_students: bool,
    /// Cap across all repetitions; -1 = unbounded.
    #[serde(default = "unbounded")]
    pub max_xp: i32,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    #[serde(default)]
    pub common_data_id: Option<u64>,
    #[serde(default = "yes")]
    pub visible_to_students: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default = "yes")]
    pub verification_required: bool,
    #[serde(default = "yes")]
    pub hideable: bool,
    #[serde(default)]
    pub available_outside_course: bool,
    /// 0 = single attempt, -1 = unbounded, n = n additional repeats.
    #[serde(default)]
    pub max_repeats: i32,
    #[serde(default)]
    pub repeat_per_semester: bool,
    #[serde(default)]
    pub hours_between_repeats: u32,
    #[serde(default)]
    pub date_available: NaiveDate,
    #[serde(default)]
    pub time_available: NaiveTime,
    #[serde(default)]
    pub date_expired: Option<NaiveDate>,
    #[serde(default)]
    pub time_expired: Option<NaiveTime>,
    #[serde(default)]
    pub blocking: bool,
    #[serde(default)]
    pub map_transition: bool,
    #[serde(default)]
    pub specific_teacher_to_notify: Option<UserId>,
    /// Non-staff user allowed to edit while unpublished.
    #[serde(default)]
    pub editor: Option<UserId>,
    #[serde(default)]
    pub sort_order: i32,
}

fn yes() -> bool {
    true
}

fn unbounded() -> i32 {
    UNLIMITED
}

impl Quest {
    pub fn new(name: impl Into<String>, xp: u32) -> Self {
        Self {
            id: 0,
            import_id: Uuid::new_v4(),
            name: name.into(),
            short_description: String::new(),
            instructions: String::new(),
            submission_details: String::new(),
            instructor_notes: String::new(),
            xp,
            xp_can_be_entered_by_students: false,
            max_xp: UNLIMITED,
            icon: None,
            campaign_id: None,
            common_data_id: None,
            visible_to_students: true,
            archived: false,
            verification_required: true,
            hideable: true,
            available_outside_course: false,
            max_repeats: 0,
            repeat_per_semester: false,
            hours_between_repeats: 0,
            date_available: NaiveDate::default(),
            time_available: NaiveTime::default(),
            date_expired: None,
            time_expired: None,
            blocking: false,
            map_transition: false,
            specific_teacher_to_notify: None,
            editor: None,
            sort_order: 0,
        }
    }

    pub fn is_repeatable(&self) -> bool {
        self.max_repeats != 0
    }

    /// Expiry at deck-local `now`.
    ///
    /// - no date, no time: never
    /// - date only: after the day ends
    /// - date and time: from that instant on
    /// - time only: daily from that time until midnight
    pub fn expired(&self, now: NaiveDateTime) -> bool {
        match (self.date_expired, self.time_expired) {
            (None, None) => false,
            (Some(date), None) => now.date() > date,
            (Some(date), Some(time)) => now >= date.and_time(time),
            (None, Some(time)) => now.time() >= time,
        }
    }

    pub fn has_become_available(&self, now: NaiveDateTime) -> bool {
        let today = now.date();
        self.date_available < today
            || (self.date_available == today && self.time_available <= now.time())
    }

    /// Derived on every call, never stored.
    pub fn currently_active(&self, campaign: Option<&Campaign>, now: NaiveDateTime) -> bool {
        self.visible_to_students
            && !self.archived
            && campaign.map_or(true, |c| c.active)
            && self.has_become_available(now)
            && !self.expired(now)
    }
}

/// A grouping of quests ("category" in older decks).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    #[serde(default)]
    pub id: CampaignId,
    #[serde(default = "Uuid::new_v4")]
    pub import_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default = "yes")]
    pub active: bool,
}

impl Campaign {
    pub fn new(title: impl Into<String>) -> Self {
        Self { id: 0, import_id: Uuid::new_v4(), title: title.into(), icon: None, active: true }
    }
}

/// Instructions shared by several quests.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CommonData {
    #[serde(default)]
    pub id: u64,
    pub title: String,
    pub instructions: String,
    #[serde(default = "yes")]
    pub active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BadgeType {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(default = "yes")]
    pub repeatable: bool,
    /// Never granted by the automatic sweep.
    #[serde(default)]
    pub manual_only: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Badge {
    #[serde(default)]
    pub id: BadgeId,
    #[serde(default = "Uuid::new_v4")]
    pub import_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub xp: u32,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub badge_type_id: Option<u64>,
    #[serde(default)]
    pub badge_series: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "yes")]
    pub active: bool,
    #[serde(default)]
    pub map_transition: bool,
}

impl Badge {
    pub fn new(name: impl Into<String>, xp: u32) -> Self {
        Self {
            id: 0,
            import_id: Uuid::new_v4(),
            name: name.into(),
            xp,
            icon: None,
            badge_type_id: None,
            badge_series: None,
            sort_order: 0,
            active: true,
            map_transition: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Rank {
    #[serde(default)]
    pub id: RankId,
    pub name: String,
    pub xp: u32,
    #[serde(default)]
    pub icon: Option<String>,
}

impl Rank {
    pub fn new(name: impl Into<String>, xp: u32) -> Self {
        Self { id: 0, name: name.into(), xp, icon: None }
    }

    /// Implied when no rank sits at or below the user's XP.
    pub fn zero() -> Self {
        Self { id: 0, name: "None".into(), xp: 0, icon: None }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Semester {
    #[serde(default)]
    pub id: SemesterId,
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    #[serde(default)]
    pub closed: bool,
}

impl Semester {
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.first_day <= day && day <= self.last_day
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Course {
    #[serde(default)]
    pub id: CourseId,
    pub title: String,
    #[serde(default = "default_xp_for_100")]
    pub xp_for_100_percent: u32,
    #[serde(default = "yes")]
    pub active: bool,
}

fn default_xp_for_100() -> u32 {
    1000
}

/// A class block / group of students.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Group {
    #[serde(default)]
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub current_teacher: Option<UserId>,
    #[serde(default = "yes")]
    pub active: bool,
}

/// A user's enrolment in a course for a semester.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Enrolment {
    #[serde(default)]
    pub id: u64,
    pub user_id: UserId,
    pub semester_id: SemesterId,
    #[serde(default)]
    pub course_id: Option<CourseId>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    /// Manual XP adjustment entered by staff; may be negative.
    #[serde(default)]
    pub xp_adjustment: i64,
    #[serde(default)]
    pub xp_adjust_explanation: Option<String>,
}
