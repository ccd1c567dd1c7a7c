use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{conflicts_for, now, validate_assignee, validate_times};
use super::mutations::{may_manage, occurrence_dates};
use super::{Engine, EngineError};

fn validate_title(title: &str) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::InvalidShift("event title must not be blank"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("event title too long"));
    }
    Ok(())
}

/// Attach the conflict flag computed against the event's day.
pub(super) fn view_of(day: &DayState, event: &CareEvent) -> EventView {
    let candidate = Candidate {
        date: event.date,
        start_time: event.start_time,
        end_time: event.end_time,
        assigned_to: event.assigned_to.clone(),
    };
    EventView {
        event: event.clone(),
        has_conflict: !conflicts_for(day, &candidate, Some(event.id)).is_empty(),
    }
}

impl Engine {
    /// Create a care event, or a series of them. Events never block on
    /// conflicts; the flag on each view reports them.
    pub async fn create_event(
        &self,
        draft: EventDraft,
        actor: &Actor,
    ) -> Result<Vec<EventView>, EngineError> {
        validate_title(&draft.title)?;
        validate_times(draft.start_time, draft.end_time)?;
        validate_assignee(draft.assigned_to.as_deref())?;
        let (dates, rule) = occurrence_dates(
            draft.date,
            draft.recurring,
            draft.recurrence_pattern.as_ref(),
            self.config.recurrence_horizon_days,
        )?;

        let series_id = rule.as_ref().map(|_| Ulid::new());
        let created_at = now();
        let events: Vec<CareEvent> = dates
            .iter()
            .map(|&date| CareEvent {
                id: Ulid::new(),
                title: draft.title.clone(),
                date,
                start_time: draft.start_time,
                end_time: draft.end_time,
                assigned_to: draft.assigned_to.clone(),
                category: draft.category,
                priority: draft.priority,
                recurrence: rule.clone(),
                series_id,
                created_by: actor.id.clone(),
                created_at,
            })
            .collect();

        let mut days = self.lock_days(dates.iter().copied()).await;
        for event in &events {
            let day = days.get(&event.date).ok_or(EngineError::NotFound(event.id))?;
            if day.events.len() >= MAX_EVENTS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many events on day"));
            }
        }

        let mut views = Vec::with_capacity(events.len());
        for event in events {
            let day = days.get_mut(&event.date).ok_or(EngineError::NotFound(event.id))?;
            self.persist_and_apply(day, &JournalEntry::EventSaved(event.clone()))
                .await?;
            views.push(view_of(day, &event));
        }
        info!(count = views.len(), date = %draft.date, title = %draft.title, "events created");
        Ok(views)
    }

    pub async fn update_event(
        &self,
        id: Ulid,
        patch: EventPatch,
        actor: &Actor,
    ) -> Result<EventView, EngineError> {
        let old_date = self.store.event_date(&id).ok_or(EngineError::NotFound(id))?;
        let new_date = patch.date.unwrap_or(old_date);
        let mut days = self.lock_days([old_date, new_date]).await;

        let current = days
            .get(&old_date)
            .and_then(|d| d.event(id))
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if !may_manage(actor, &current.created_by) {
            return Err(EngineError::NotPermitted("only the creator or a coordinator may edit an event"));
        }

        let mut updated = current;
        updated.date = new_date;
        if let Some(title) = patch.title {
            validate_title(&title)?;
            updated.title = title;
        }
        if let Some(start) = patch.start_time {
            updated.start_time = start;
        }
        if let Some(end) = patch.end_time {
            updated.end_time = end;
        }
        if let Some(assignee) = patch.assigned_to {
            validate_assignee(assignee.as_deref())?;
            updated.assigned_to = assignee;
        }
        if let Some(category) = patch.category {
            updated.category = category;
        }
        if let Some(priority) = patch.priority {
            updated.priority = priority;
        }
        validate_times(updated.start_time, updated.end_time)?;

        if new_date != old_date {
            let target = days.get(&new_date).ok_or(EngineError::NotFound(id))?;
            if target.events.len() >= MAX_EVENTS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many events on day"));
            }
            let old_day = days.get_mut(&old_date).ok_or(EngineError::NotFound(id))?;
            self.persist_and_apply(old_day, &JournalEntry::EventDeleted { id, date: old_date })
                .await?;
        }
        let day = days.get_mut(&new_date).ok_or(EngineError::NotFound(id))?;
        self.persist_and_apply(day, &JournalEntry::EventSaved(updated.clone()))
            .await?;
        info!(%id, date = %new_date, "event updated");
        Ok(view_of(day, &updated))
    }

    pub async fn delete_event(&self, id: Ulid, actor: &Actor) -> Result<CareEvent, EngineError> {
        let mut day = self.resolve_event_write(id).await?;
        let event = day.event(id).cloned().ok_or(EngineError::NotFound(id))?;
        if !may_manage(actor, &event.created_by) {
            return Err(EngineError::NotPermitted("only the creator or a coordinator may delete an event"));
        }
        self.persist_and_apply(&mut day, &JournalEntry::EventDeleted { id, date: event.date })
            .await?;
        info!(%id, date = %event.date, "event deleted");
        Ok(event)
    }
}
