//! Organization health API over `aws-sdk-health`

use aws_sdk_health::Client;
use aws_sdk_health::error::{DisplayErrorContext, SdkError};
use aws_sdk_health::primitives::DateTime as SdkDateTime;
use aws_sdk_health::types::{EntityAccountFilter, EntityStatusCode, EventAccountFilter};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::runtime::Runtime;
use tracing::debug;

use super::{current_thread_runtime, load_sdk_config};
use crate::source::{
    AffectedEntity, EntityFilter, EventDescription, EventDetails, HealthApi, HealthEvent, Page,
    SourceError, SourceResult,
};

const LIST_EVENTS: &str = "DescribeEventsForOrganization";
const LIST_ACCOUNTS: &str = "DescribeAffectedAccountsForOrganization";
const DESCRIBE_DETAILS: &str = "DescribeEventDetailsForOrganization";
const LIST_ENTITIES: &str = "DescribeAffectedEntitiesForOrganization";

/// [`HealthApi`] backed by the AWS Health organizational view
pub struct AwsHealthApi {
    client: Client,
    runtime: Runtime,
}

impl AwsHealthApi {
    /// Connect to the health API in `region`
    pub fn connect(region: &str) -> SourceResult<Self> {
        let runtime = current_thread_runtime()
            .map_err(|e| SourceError::transport("connect", e.to_string()))?;
        let config = load_sdk_config(&runtime, region);
        debug!(region, "Health client ready");

        Ok(Self {
            client: Client::new(&config),
            runtime,
        })
    }
}

fn sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> SourceError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            SourceError::transport(operation, message)
        }
        SdkError::ResponseError(_) => SourceError::invalid_response(operation, message),
        _ => SourceError::api(operation, message),
    }
}

fn to_utc(at: Option<&SdkDateTime>) -> Option<DateTime<Utc>> {
    at.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
}

fn put_str(extra: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        extra.insert(key.to_string(), Value::String(value.to_string()));
    }
}

fn from_org_event(event: &aws_sdk_health::types::OrganizationEvent) -> HealthEvent {
    let mut extra = Map::new();
    put_str(&mut extra, "service", event.service());
    put_str(
        &mut extra,
        "eventTypeCategory",
        event.event_type_category().map(|c| c.as_str()),
    );
    put_str(&mut extra, "eventScopeCode", event.event_scope_code().map(|c| c.as_str()));
    put_str(&mut extra, "statusCode", event.status_code().map(|c| c.as_str()));

    HealthEvent {
        arn: event.arn().unwrap_or_default().to_string(),
        region: event.region().map(str::to_string),
        event_type_code: event.event_type_code().map(str::to_string),
        start_time: to_utc(event.start_time()),
        end_time: to_utc(event.end_time()),
        last_updated_time: to_utc(event.last_updated_time()),
        extra,
    }
}

fn from_event(event: &aws_sdk_health::types::Event) -> HealthEvent {
    let mut extra = Map::new();
    put_str(&mut extra, "service", event.service());
    put_str(
        &mut extra,
        "eventTypeCategory",
        event.event_type_category().map(|c| c.as_str()),
    );
    put_str(&mut extra, "eventScopeCode", event.event_scope_code().map(|c| c.as_str()));
    put_str(&mut extra, "statusCode", event.status_code().map(|c| c.as_str()));
    put_str(&mut extra, "availabilityZone", event.availability_zone());

    HealthEvent {
        arn: event.arn().unwrap_or_default().to_string(),
        region: event.region().map(str::to_string),
        event_type_code: event.event_type_code().map(str::to_string),
        start_time: to_utc(event.start_time()),
        end_time: to_utc(event.end_time()),
        last_updated_time: to_utc(event.last_updated_time()),
        extra,
    }
}

impl HealthApi for AwsHealthApi {
    fn list_events(
        &self,
        cursor: Option<&str>,
        page_size: Option<u32>,
    ) -> SourceResult<Page<HealthEvent>> {
        let request = self
            .client
            .describe_events_for_organization()
            .set_next_token(cursor.map(str::to_string))
            .set_max_results(page_size.map(|n| n as i32));

        let output = self
            .runtime
            .block_on(request.send())
            .map_err(|e| sdk_error(LIST_EVENTS, e))?;

        let events = output.events().iter().map(from_org_event).collect();
        Ok(Page::new(events, output.next_token().map(str::to_string)))
    }

    fn list_affected_accounts(
        &self,
        event_arn: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> SourceResult<Page<String>> {
        let request = self
            .client
            .describe_affected_accounts_for_organization()
            .event_arn(event_arn)
            .set_next_token(cursor.map(str::to_string))
            .max_results(page_size as i32);

        let output = self
            .runtime
            .block_on(request.send())
            .map_err(|e| sdk_error(LIST_ACCOUNTS, e))?;

        Ok(Page::new(
            output.affected_accounts().to_vec(),
            output.next_token().map(str::to_string),
        ))
    }

    fn describe_event_details(
        &self,
        event_arn: &str,
        account_id: Option<&str>,
    ) -> SourceResult<Vec<EventDetails>> {
        let filter = EventAccountFilter::builder()
            .event_arn(event_arn)
            .set_aws_account_id(account_id.map(str::to_string))
            .build()
            .map_err(|e| SourceError::api(DESCRIBE_DETAILS, e.to_string()))?;

        let request = self
            .client
            .describe_event_details_for_organization()
            .organization_event_detail_filters(filter);

        let output = self
            .runtime
            .block_on(request.send())
            .map_err(|e| sdk_error(DESCRIBE_DETAILS, e))?;

        for failed in output.failed_set() {
            debug!(
                event_arn,
                account_id = failed.aws_account_id().unwrap_or(""),
                error = failed.error_message().unwrap_or(""),
                "Detail lookup reported a failed entry"
            );
        }

        let details = output
            .successful_set()
            .iter()
            .map(|d| EventDetails {
                aws_account_id: d.aws_account_id().map(str::to_string),
                event: d.event().map(from_event),
                event_description: EventDescription {
                    latest_description: d
                        .event_description()
                        .and_then(|desc| desc.latest_description())
                        .map(str::to_string),
                },
                event_metadata: d
                    .event_metadata()
                    .map(|meta| {
                        meta.iter()
                            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();
        Ok(details)
    }

    fn list_affected_entities(
        &self,
        filter: &EntityFilter,
        cursor: Option<&str>,
        page_size: u32,
    ) -> SourceResult<Page<AffectedEntity>> {
        let account_filter = EntityAccountFilter::builder()
            .event_arn(&filter.event_arn)
            .aws_account_id(&filter.account_id)
            .set_status_codes(Some(
                filter
                    .status_codes
                    .iter()
                    .map(|s| EntityStatusCode::from(s.as_str()))
                    .collect(),
            ))
            .build()
            .map_err(|e| SourceError::api(LIST_ENTITIES, e.to_string()))?;

        let request = self
            .client
            .describe_affected_entities_for_organization()
            .organization_entity_account_filters(account_filter)
            .set_next_token(cursor.map(str::to_string))
            .max_results(page_size as i32);

        let output = self
            .runtime
            .block_on(request.send())
            .map_err(|e| sdk_error(LIST_ENTITIES, e))?;

        let entities = output
            .entities()
            .iter()
            .map(|e| AffectedEntity {
                entity_value: e.entity_value().map(str::to_string),
                status_code: e.status_code().map(|s| s.as_str().into()),
            })
            .collect();
        Ok(Page::new(entities, output.next_token().map(str::to_string)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_utc() {
        let at = SdkDateTime::from_secs(1_709_289_000);
        let converted = to_utc(Some(&at)).unwrap();
        assert_eq!(
            crate::record::format_timestamp(&converted),
            "Fri, 01 Mar 2024 10:30:00 GMT"
        );
        assert!(to_utc(None).is_none());
    }

    #[test]
    fn test_from_org_event_keeps_extra_attributes() {
        let event = aws_sdk_health::types::OrganizationEvent::builder()
            .arn("evt-1")
            .service("EC2")
            .region("us-east-1")
            .start_time(SdkDateTime::from_secs(1_709_289_000))
            .build();

        let converted = from_org_event(&event);
        assert_eq!(converted.arn, "evt-1");
        assert_eq!(converted.region.as_deref(), Some("us-east-1"));
        assert!(converted.start_time.is_some());
        assert_eq!(converted.extra["service"], Value::String("EC2".into()));
    }
}
