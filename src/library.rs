//! Quest library: exchange quests and campaigns between decks.
//!
//! Records are keyed by `import_id`. A quest's prerequisites travel as the
//! `&`-joined import ids of its simple quest/badge prerequisites; OR and NOT
//! clauses are not exported. Imports add prerequisites and never remove them.
//!
//! An import runs against a copy of the deck and replaces it only when every
//! row went through, so a failed import leaves nothing behind.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Campaign, CampaignId, EntityKind, EntityRef, Quest, QuestId};
use crate::error::{EngineError, Result};
use crate::prereq::{self, PrereqRelation};
use crate::store::DeckData;

pub const PREREQ_SEPARATOR: char = '&';

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestRecord {
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
    #[serde(default)]
    pub xp_can_be_entered_by_students: bool,
    #[serde(default = "unbounded")]
    pub max_xp: i32,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub max_repeats: i32,
    #[serde(default)]
    pub repeat_per_semester: bool,
    #[serde(default)]
    pub hours_between_repeats: u32,
    #[serde(default = "yes")]
    pub verification_required: bool,
    #[serde(default = "yes")]
    pub hideable: bool,
    #[serde(default)]
    pub available_outside_course: bool,
    #[serde(default)]
    pub blocking: bool,
    #[serde(default)]
    pub map_transition: bool,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub date_available: NaiveDate,
    #[serde(default)]
    pub time_available: NaiveTime,
    #[serde(default)]
    pub date_expired: Option<NaiveDate>,
    #[serde(default)]
    pub time_expired: Option<NaiveTime>,
    #[serde(default)]
    pub campaign_import_id: Option<Uuid>,
    /// `&`-joined import ids of quests/badges this quest requires.
    #[serde(default)]
    pub prereq_import_ids: String,
}

fn yes() -> bool {
    true
}

fn unbounded() -> i32 {
    crate::domain::UNLIMITED
}

impl QuestRecord {
    fn apply_to(&self, q: &mut Quest) {
        q.name = self.name.clone();
        q.short_description = self.short_description.clone();
        q.instructions = self.instructions.clone();
        q.submission_details = self.submission_details.clone();
        q.instructor_notes = self.instructor_notes.clone();
        q.xp = self.xp;
        q.xp_can_be_entered_by_students = self.xp_can_be_entered_by_students;
        q.max_xp = self.max_xp;
        q.icon = self.icon.clone();
        q.max_repeats = self.max_repeats;
        q.repeat_per_semester = self.repeat_per_semester;
        q.hours_between_repeats = self.hours_between_repeats;
        q.verification_required = self.verification_required;
        q.hideable = self.hideable;
        q.available_outside_course = self.available_outside_course;
        q.blocking = self.blocking;
        q.map_transition = self.map_transition;
        q.sort_order = self.sort_order;
        q.date_available = self.date_available;
        q.time_available = self.time_available;
        q.date_expired = self.date_expired;
        q.time_expired = self.time_expired;
    }

    pub fn prereq_ids(&self) -> std::result::Result<Vec<Uuid>, String> {
        self.prereq_import_ids
            .split(PREREQ_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Uuid::parse_str(s).map_err(|e| format!("bad prerequisite id {s:?}: {e}")))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::ImportValidation(format!("quest {} has no name", self.import_id)));
        }
        if self.max_repeats < crate::domain::UNLIMITED || self.max_xp < crate::domain::UNLIMITED {
            return Err(EngineError::ImportValidation(format!("quest {:?} has a negative limit", self.name)));
        }
        self.prereq_ids()
            .map_err(|e| EngineError::ImportValidation(format!("quest {:?}: {e}", self.name)))?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub import_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub quests: Vec<QuestRecord>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ImportOptions {
    /// Import ids to leave alone.
    #[serde(default)]
    pub skip: BTreeSet<Uuid>,
    /// Update rows whose import id already exists instead of aborting.
    #[serde(default)]
    pub merge_existing: bool,
    /// Do not add a simple prerequisite the quest already has.
    #[serde(default)]
    pub dedupe_prereqs: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub created: Vec<QuestId>,
    pub updated: Vec<QuestId>,
    pub skipped: Vec<Uuid>,
    /// (quest import id, prerequisite import id) pairs that matched nothing.
    pub unresolved_prereqs: Vec<(Uuid, Uuid)>,
}

fn import_id_of(deck: &DeckData, e: EntityRef) -> Option<Uuid> {
    match e.kind {
        EntityKind::Quest => deck.quests.get(&e.id).map(|q| q.import_id),
        EntityKind::Badge => deck.badges.get(&e.id).map(|b| b.import_id),
        _ => None,
    }
}

fn resolve(deck: &DeckData, import_id: Uuid) -> Option<EntityRef> {
    deck.quest_by_import_id(import_id)
        .map(|q| EntityRef::quest(q.id))
        .or_else(|| deck.badge_by_import_id(import_id).map(|b| EntityRef::badge(b.id)))
}

pub fn export_quest(deck: &DeckData, id: QuestId) -> Result<QuestRecord> {
    let q = deck.quest(id)?;
    let prereqs: Vec<String> = prereq::prereqs_of(deck, EntityRef::quest(id))
        .into_iter()
        .filter(|r| r.is_simple())
        .filter_map(|r| import_id_of(deck, r.main))
        .map(|u| u.to_string())
        .collect();
    Ok(QuestRecord {
        import_id: q.import_id,
        name: q.name.clone(),
        short_description: q.short_description.clone(),
        instructions: q.instructions.clone(),
        submission_details: q.submission_details.clone(),
        instructor_notes: q.instructor_notes.clone(),
        xp: q.xp,
        xp_can_be_entered_by_students: q.xp_can_be_entered_by_students,
        max_xp: q.max_xp,
        icon: q.icon.clone(),
        max_repeats: q.max_repeats,
        repeat_per_semester: q.repeat_per_semester,
        hours_between_repeats: q.hours_between_repeats,
        verification_required: q.verification_required,
        hideable: q.hideable,
        available_outside_course: q.available_outside_course,
        blocking: q.blocking,
        map_transition: q.map_transition,
        sort_order: q.sort_order,
        date_available: q.date_available,
        time_available: q.time_available,
        date_expired: q.date_expired,
        time_expired: q.time_expired,
        campaign_import_id: q.campaign_id.and_then(|c| deck.campaigns.get(&c)).map(|c| c.import_id),
        prereq_import_ids: prereqs.join(&PREREQ_SEPARATOR.to_string()),
    })
}

/// Export a campaign and its quests. Quests whose import id is in `exclude`
/// are left out.
pub fn export_campaign(deck: &DeckData, id: CampaignId, exclude: &BTreeSet<Uuid>) -> Result<CampaignRecord> {
    let c = deck
        .campaigns
        .get(&id)
        .ok_or_else(|| EngineError::not_found(format!("Campaign {id}")))?;
    let quests = deck
        .quests
        .values()
        .filter(|q| q.campaign_id == Some(id) && !exclude.contains(&q.import_id))
        .map(|q| export_quest(deck, q.id))
        .collect::<Result<Vec<_>>>()?;
    Ok(CampaignRecord { import_id: c.import_id, title: c.title.clone(), icon: c.icon.clone(), quests })
}

/// Import quest rows. All-or-nothing.
#[instrument(level = "info", skip_all, fields(rows = rows.len()))]
pub fn import_quests(deck: &mut DeckData, rows: &[QuestRecord], opts: &ImportOptions) -> Result<ImportReport> {
    let mut work = deck.clone();
    let report = import_into(&mut work, rows, None, opts)?;
    *deck = work;
    info!(
        target: "library",
        created = report.created.len(),
        updated = report.updated.len(),
        skipped = report.skipped.len(),
        unresolved = report.unresolved_prereqs.len(),
        "Quests imported"
    );
    Ok(report)
}

/// Import a campaign and its quests. All-or-nothing.
#[instrument(level = "info", skip_all, fields(import_id = %record.import_id))]
pub fn import_campaign(deck: &mut DeckData, record: &CampaignRecord, opts: &ImportOptions) -> Result<ImportReport> {
    let mut work = deck.clone();
    let existing = work.campaigns.values().find(|c| c.import_id == record.import_id).map(|c| c.id);
    let campaign_id = match existing {
        Some(id) if opts.merge_existing => {
            if let Some(c) = work.campaigns.get_mut(&id) {
                c.title = record.title.clone();
                c.icon = record.icon.clone();
            }
            id
        }
        Some(_) => {
            return Err(EngineError::ImportValidation(format!(
                "campaign {} already exists in this deck",
                record.import_id
            )))
        }
        None => {
            let mut c = Campaign::new(record.title.clone());
            c.import_id = record.import_id;
            c.icon = record.icon.clone();
            work.insert_campaign(c)
        }
    };
    let report = import_into(&mut work, &record.quests, Some(campaign_id), opts)?;
    *deck = work;
    info!(target: "library", campaign_id, created = report.created.len(), "Campaign imported");
    Ok(report)
}

fn import_into(
    deck: &mut DeckData,
    rows: &[QuestRecord],
    campaign: Option<CampaignId>,
    opts: &ImportOptions,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let mut touched: Vec<(QuestId, &QuestRecord)> = Vec::new();
    let mut seen = BTreeSet::new();

    for row in rows {
        if opts.skip.contains(&row.import_id) {
            report.skipped.push(row.import_id);
            continue;
        }
        if !seen.insert(row.import_id) {
            return Err(EngineError::ImportValidation(format!("import id {} appears twice", row.import_id)));
        }
        row.validate()?;
        let campaign_id = campaign.or_else(|| {
            row.campaign_import_id
                .and_then(|cid| deck.campaigns.values().find(|c| c.import_id == cid))
                .map(|c| c.id)
        });
        match deck.quest_by_import_id(row.import_id).cloned() {
            Some(mut existing) => {
                if !opts.merge_existing {
                    return Err(EngineError::ImportValidation(format!(
                        "quest {} ({:?}) already exists; skip it or merge",
                        row.import_id, existing.name
                    )));
                }
                row.apply_to(&mut existing);
                if campaign_id.is_some() {
                    existing.campaign_id = campaign_id;
                }
                let id = existing.id;
                deck.update_quest(existing).map_err(as_validation)?;
                report.updated.push(id);
                touched.push((id, row));
            }
            None => {
                let mut q = Quest::new(row.name.clone(), row.xp);
                row.apply_to(&mut q);
                q.import_id = row.import_id;
                q.campaign_id = campaign_id;
                q.visible_to_students = false;
                let id = deck.insert_quest(q).map_err(as_validation)?;
                report.created.push(id);
                touched.push((id, row));
            }
        }
    }

    // Prerequisites resolve after every row exists so rows may reference each other.
    for (id, row) in touched {
        let parent = EntityRef::quest(id);
        for pid in row.prereq_ids().map_err(EngineError::ImportValidation)? {
            let Some(required) = resolve(deck, pid) else {
                warn!(target: "library", quest = %row.import_id, prereq = %pid, "Prerequisite not found in this deck");
                report.unresolved_prereqs.push((row.import_id, pid));
                continue;
            };
            let added = if opts.dedupe_prereqs {
                prereq::add_simple_prereq(deck, parent, required)
            } else {
                prereq::add_relation(deck, PrereqRelation::simple(parent, required))
            };
            added.map_err(as_validation)?;
        }
    }
    Ok(report)
}

fn as_validation(e: EngineError) -> EngineError {
    match e {
        EngineError::ImportValidation(_) => e,
        other => EngineError::ImportValidation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeckSettings;
    use crate::domain::Badge;

    fn source_deck() -> (DeckData, QuestId, Uuid) {
        let mut d = DeckData::new(DeckSettings::default());
        let badge = d.insert_badge(Badge::new("Safety", 0));
        let badge_import = d.badges[&badge].import_id;
        let intro = d.insert_quest(Quest::new("Intro", 2)).unwrap();
        let mut q = Quest::new("Soldering", 10);
        q.instructions = "Solder the header.".into();
        q.max_repeats = 2;
        q.hours_between_repeats = 24;
        let q = d.insert_quest(q).unwrap();
        prereq::add_simple_prereq(&mut d, EntityRef::quest(q), EntityRef::quest(intro)).unwrap();
        prereq::add_simple_prereq(&mut d, EntityRef::quest(q), EntityRef::badge(badge)).unwrap();
        let mut or_clause = PrereqRelation::simple(EntityRef::quest(q), EntityRef::quest(intro));
        or_clause.alt = Some(EntityRef::badge(badge));
        prereq::add_relation(&mut d, or_clause).unwrap();
        (d, q, badge_import)
    }

    #[test]
    fn export_keeps_only_simple_prereqs() {
        let (d, q, badge_import) = source_deck();
        let rec = export_quest(&d, q).unwrap();
        let ids = rec.prereq_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&badge_import));
        assert_eq!(rec.prereq_import_ids.matches('&').count(), 1);
    }

    #[test]
    fn import_round_trips_content_and_simple_prereqs() {
        let (src, q, badge_import) = source_deck();
        let intro = src.quests.values().find(|q| q.name == "Intro").unwrap().clone();
        let rows = vec![export_quest(&src, intro.id).unwrap(), export_quest(&src, q).unwrap()];

        let mut dst = DeckData::new(DeckSettings::default());
        let mut badge = Badge::new("Safety", 0);
        badge.import_id = badge_import;
        dst.insert_badge(badge);
        let report = import_quests(&mut dst, &rows, &ImportOptions::default()).unwrap();
        assert_eq!(report.created.len(), 2);
        assert!(report.unresolved_prereqs.is_empty());

        let imported = dst.quest_by_import_id(rows[1].import_id).unwrap();
        assert!(!imported.visible_to_students);
        assert_eq!(export_quest(&dst, imported.id).unwrap(), rows[1]);
    }

    #[test]
    fn collision_aborts_without_partial_writes() {
        let (mut d, q, _) = source_deck();
        let rec = export_quest(&d, q).unwrap();
        let mut fresh = rec.clone();
        fresh.import_id = Uuid::new_v4();
        fresh.name = "Brand new".into();
        let before = d.quests.len();
        let err = import_quests(&mut d, &[fresh, rec.clone()], &ImportOptions::default()).unwrap_err();
        assert_eq!(err.code(), "import_validation");
        assert_eq!(d.quests.len(), before);

        let opts = ImportOptions { skip: BTreeSet::from([rec.import_id]), ..Default::default() };
        let report = import_quests(&mut d, &[rec.clone()], &opts).unwrap();
        assert_eq!(report.skipped, vec![rec.import_id]);
        assert_eq!(export_quest(&d, q).unwrap(), rec);
    }

    #[test]
    fn merging_appends_prereqs_unless_deduped() {
        let (mut d, q, _) = source_deck();
        let rec = export_quest(&d, q).unwrap();
        let count = |d: &DeckData| prereq::prereqs_of(d, EntityRef::quest(q)).len();
        assert_eq!(count(&d), 3);

        let dedupe = ImportOptions { merge_existing: true, dedupe_prereqs: true, ..Default::default() };
        let report = import_quests(&mut d, &[rec.clone()], &dedupe).unwrap();
        assert_eq!(report.updated, vec![q]);
        assert_eq!(count(&d), 3);

        let merge = ImportOptions { merge_existing: true, ..Default::default() };
        import_quests(&mut d, &[rec], &merge).unwrap();
        assert_eq!(count(&d), 5);
    }

    #[test]
    fn unknown_prereqs_are_reported() {
        let mut d = DeckData::new(DeckSettings::default());
        let mut rec = export_quest(&source_deck().0, 3).unwrap();
        rec.prereq_import_ids = Uuid::nil().to_string();
        let report = import_quests(&mut d, &[rec.clone()], &ImportOptions::default()).unwrap();
        assert_eq!(report.unresolved_prereqs, vec![(rec.import_id, Uuid::nil())]);
    }

    #[test]
    fn campaigns_import_with_their_quests() {
        let mut src = DeckData::new(DeckSettings::default());
        let k = src.insert_campaign(Campaign::new("Electronics"));
        let mut q = Quest::new("Ohm's law", 5);
        q.campaign_id = Some(k);
        src.insert_quest(q).unwrap();
        let rec = export_campaign(&src, k, &BTreeSet::new()).unwrap();
        assert_eq!(rec.quests.len(), 1);
        assert_eq!(rec.quests[0].campaign_import_id, Some(rec.import_id));

        let mut dst = DeckData::new(DeckSettings::default());
        let report = import_campaign(&mut dst, &rec, &ImportOptions::default()).unwrap();
        let imported = dst.quest(report.created[0]).unwrap();
        let campaign = dst.campaigns.values().next().unwrap();
        assert_eq!(imported.campaign_id, Some(campaign.id));
        assert_eq!(campaign.import_id, rec.import_id);
        assert!(import_campaign(&mut dst, &rec, &ImportOptions::default()).is_err());
    }
}
