//! Campaign domain types.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Campaign ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub segment_id: Uuid,
    #[serde(default)]
    pub flow_id: Option<Uuid>,
    pub status: CampaignStatus,
    pub start_date: NaiveDate,
    #[serde(default, with = "time_of_day")]
    pub start_time_of_day: Option<NaiveTime>,
    /// Single message sent when no flow (or an empty flow) is attached.
    #[serde(default)]
    pub blast: Option<BlastMessage>,
    /// Start of the most recent plan; replayed by `redispatch`.
    #[serde(default)]
    pub schedule_start: Option<NaiveDateTime>,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastMessage {
    pub subject: String,
    #[serde(default)]
    pub body_text: String,
}

// ─── Requests ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub segment_id: Uuid,
    #[serde(default)]
    pub flow_id: Option<Uuid>,
    /// Defaults to the creation date.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default, with = "time_of_day")]
    pub start_time_of_day: Option<NaiveTime>,
    #[serde(default)]
    pub blast: Option<BlastMessage>,
}

/// Partial update applied to a draft campaign. An explicit `null` clears an
/// optional field; an absent key leaves it unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCampaignRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub flow_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "time_of_day::present")]
    pub start_time_of_day: Option<Option<NaiveTime>>,
    #[serde(default, deserialize_with = "present")]
    pub blast: Option<Option<BlastMessage>>,
}

fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl Campaign {
    pub fn from_request(req: CreateCampaignRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            segment_id: req.segment_id,
            flow_id: req.flow_id,
            status: CampaignStatus::Draft,
            start_date: req.start_date.unwrap_or_else(|| now.date_naive()),
            start_time_of_day: req.start_time_of_day,
            blast: req.blast,
            schedule_start: None,
            activated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply_update(&mut self, req: UpdateCampaignRequest, now: DateTime<Utc>) {
        if let Some(name) = req.name {
            self.name = name;
        }
        if let Some(description) = req.description {
            self.description = description;
        }
        if let Some(flow_id) = req.flow_id {
            self.flow_id = flow_id;
        }
        if let Some(start_date) = req.start_date {
            self.start_date = start_date;
        }
        if let Some(start_time) = req.start_time_of_day {
            self.start_time_of_day = start_time;
        }
        if let Some(blast) = req.blast {
            self.blast = blast;
        }
        self.updated_at = now;
    }
}

/// `HH:MM` (or `HH:MM:SS`) wall-clock times.
pub mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .ok()
    }

    pub fn serialize<S: Serializer>(
        time: &Option<NaiveTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => serializer.serialize_str(&t.format("%H:%M").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn present<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<NaiveTime>>, D::Error> {
        deserialize(deserializer).map(Some)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(value) => parse(value)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day '{value}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_create_request_parsing() {
        let req: CreateCampaignRequest = serde_json::from_value(serde_json::json!({
            "name": "Winter sale",
            "segment_id": Uuid::new_v4(),
            "start_date": "2024-01-01",
            "start_time_of_day": "10:00"
        }))
        .unwrap();
        assert_eq!(req.start_time_of_day, NaiveTime::from_hms_opt(10, 0, 0));

        let campaign = Campaign::from_request(req, now());
        assert_eq!(campaign.status, CampaignStatus::Draft);
        let json = serde_json::to_value(&campaign).unwrap();
        assert_eq!(json["start_time_of_day"], "10:00");
        assert_eq!(json["status"], "draft");
    }

    #[test]
    fn test_rejects_bad_time_of_day() {
        let req = serde_json::from_value::<CreateCampaignRequest>(serde_json::json!({
            "name": "Bad",
            "segment_id": Uuid::new_v4(),
            "start_time_of_day": "25:61"
        }));
        assert!(req.is_err());
        assert_eq!(time_of_day::parse("14:30:15"), NaiveTime::from_hms_opt(14, 30, 15));
    }

    #[test]
    fn test_start_date_defaults_to_creation_day() {
        let req = CreateCampaignRequest {
            name: "Blast".to_string(),
            description: None,
            segment_id: Uuid::new_v4(),
            flow_id: None,
            start_date: None,
            start_time_of_day: None,
            blast: None,
        };
        let campaign = Campaign::from_request(req, now());
        assert_eq!(campaign.start_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn test_apply_update_clears_and_sets() {
        let mut campaign = Campaign::from_request(
            CreateCampaignRequest {
                name: "Old".to_string(),
                description: Some("desc".to_string()),
                segment_id: Uuid::new_v4(),
                flow_id: Some(Uuid::new_v4()),
                start_date: None,
                start_time_of_day: None,
                blast: None,
            },
            now(),
        );
        campaign.apply_update(
            UpdateCampaignRequest {
                name: Some("New".to_string()),
                flow_id: Some(None),
                start_time_of_day: Some(NaiveTime::from_hms_opt(9, 15, 0)),
                ..Default::default()
            },
            now(),
        );
        assert_eq!(campaign.name, "New");
        assert_eq!(campaign.description.as_deref(), Some("desc"));
        assert!(campaign.flow_id.is_none());
        assert_eq!(campaign.start_time_of_day, NaiveTime::from_hms_opt(9, 15, 0));
    }

    #[test]
    fn test_update_request_distinguishes_null_from_absent() {
        let req: UpdateCampaignRequest = serde_json::from_value(serde_json::json!({
            "flow_id": null,
            "start_time_of_day": "14:30"
        }))
        .unwrap();
        assert_eq!(req.flow_id, Some(None));
        assert!(req.description.is_none());
        assert_eq!(req.start_time_of_day, Some(NaiveTime::from_hms_opt(14, 30, 0)));
    }
}
