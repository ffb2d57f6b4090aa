// Contract wizard definition

use super::schema::{FieldSpec, FormSchema, Rule, SchemaError, StepSchema};
use crate::models::{FieldMap, FieldValue};

pub const FORM_NAME: &str = "contract";

pub const DETAILS: &str = "details";
pub const SCHEDULE: &str = "schedule";
pub const RISKS: &str = "risks";
pub const ATTACHMENTS: &str = "attachments";

/// Files field of the attachments step.
pub const DOCUMENTS: &str = "documents";

pub const CONTRACT_TYPES: [&str; 3] = ["fixed_price", "time_and_materials", "retainer"];
pub const BILLING_CYCLES: [&str; 3] = ["monthly", "quarterly", "milestone"];
pub const SEVERITIES: [&str; 4] = ["low", "medium", "high", "critical"];

pub fn schema() -> Result<FormSchema, SchemaError> {
    let details = StepSchema::new(DETAILS, 10, "Contract Details")
        .field(FieldSpec::text("title", "Title").required().max_len(200))
        .field(FieldSpec::email("contractorEmail", "Contractor Email").required())
        .field(FieldSpec::choice("contractType", "Contract Type", &CONTRACT_TYPES).required())
        .field(FieldSpec::number("value", "Contract Value").required().at_least(0.0))
        .field(FieldSpec::choice("billingCycle", "Billing Cycle", &BILLING_CYCLES))
        .field(FieldSpec::text("address.street", "Street").max_len(200))
        .field(FieldSpec::text("address.city", "City").max_len(100))
        .field(FieldSpec::text("address.postalCode", "Postal Code").max_len(20))
        .rule(Rule::RequiredWhen {
            field: "billingCycle".to_string(),
            when_field: "contractType".to_string(),
            equals: "retainer".to_string(),
            message: "Billing Cycle is required for retainer contracts".to_string(),
        });

    let schedule = StepSchema::new(SCHEDULE, 20, "Schedule")
        .field(FieldSpec::date("startDate", "Start Date").required())
        .field(FieldSpec::date("endDate", "End Date").required())
        .field(FieldSpec::number("noticePeriodDays", "Notice Period (days)").range(0.0, 365.0))
        .rule(Rule::DateOrder {
            start: "startDate".to_string(),
            end: "endDate".to_string(),
            message: "End Date must be after Start Date".to_string(),
        });

    let risks = StepSchema::new(RISKS, 30, "Risks").field(FieldSpec::repeatable(
        "risks",
        "Risks",
        vec![
            FieldSpec::text("riskName", "Risk Name").required().max_len(200),
            FieldSpec::text("description", "Description").max_len(2000),
            FieldSpec::choice("severity", "Severity", &SEVERITIES).required(),
            FieldSpec::number("probability", "Probability").required().range(0.0, 1.0),
            FieldSpec::text("impact", "Impact").max_len(2000),
            FieldSpec::text("mitigationStrategy", "Mitigation Strategy").max_len(2000),
        ],
    ));

    let attachments = StepSchema::new(ATTACHMENTS, 40, "Attachments")
        .field(FieldSpec::files(DOCUMENTS, "Documents"));

    FormSchema::new(FORM_NAME, vec![details, schedule, risks, attachments])
}

/// Starting values for a new risk entry.
pub fn risk_template() -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("riskName".to_string(), FieldValue::text(""));
    fields.insert("severity".to_string(), FieldValue::choice("medium"));
    fields.insert("probability".to_string(), FieldValue::text(""));
    fields
}
