//! Plan Filter - drops statements attributable to system catalog activity
//!
//! Decisions are made on the showplan XML embedded in each record. The markup parser sits
//! behind [`MarkupParser`] so the fail-open rule lives in one place: a document that cannot
//! be parsed never excludes its record.

use crate::models::PerformanceRecord;

const STATISTICS_INFO: &str = "StatisticsInfo";
const TABLE_ATTR: &str = "Table";
const STMT_SIMPLE: &str = "StmtSimple";
const STATEMENT_TEXT_ATTR: &str = "StatementText";

#[derive(Debug, thiserror::Error)]
#[error("plan document could not be parsed: {0}")]
pub struct MarkupError(String);

/// A parsed plan document
pub trait MarkupDocument {
    /// True when an element named `element` in the document's default namespace carries an
    /// `attribute` whose value satisfies `pred`
    fn any_attribute(&self, element: &str, attribute: &str, pred: &dyn Fn(&str) -> bool) -> bool;
}

pub trait MarkupParser: Send + Sync {
    fn parse<'a>(&self, text: &'a str) -> Result<Box<dyn MarkupDocument + 'a>, MarkupError>;
}

/// [`MarkupParser`] backed by `roxmltree`
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlPlanParser;

struct XmlPlanDocument<'a> {
    doc: roxmltree::Document<'a>,
}

impl MarkupParser for XmlPlanParser {
    fn parse<'a>(&self, text: &'a str) -> Result<Box<dyn MarkupDocument + 'a>, MarkupError> {
        let doc = roxmltree::Document::parse(text).map_err(|e| MarkupError(e.to_string()))?;
        Ok(Box::new(XmlPlanDocument { doc }))
    }
}

impl MarkupDocument for XmlPlanDocument<'_> {
    fn any_attribute(&self, element: &str, attribute: &str, pred: &dyn Fn(&str) -> bool) -> bool {
        let namespace = self.doc.root_element().tag_name().namespace();
        self.doc
            .descendants()
            .filter(|node| {
                node.is_element()
                    && node.tag_name().name() == element
                    && node.tag_name().namespace() == namespace
            })
            .filter_map(|node| node.attribute(attribute))
            .any(|value| pred(value))
    }
}

pub struct PlanFilter {
    parser: Box<dyn MarkupParser>,
}

impl Default for PlanFilter {
    fn default() -> Self {
        Self::new(Box::new(XmlPlanParser))
    }
}

impl PlanFilter {
    pub fn new(parser: Box<dyn MarkupParser>) -> Self {
        Self { parser }
    }

    /// Pure and infallible; an empty or unparseable plan keeps the record
    pub fn should_keep(&self, record: &PerformanceRecord) -> bool {
        if record.query_plan.is_empty() {
            return true;
        }

        let doc = match self.parser.parse(&record.query_plan) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::debug!("Keeping record {} with unreadable plan: {}", record.plan_handle, e);
                return true;
            },
        };

        if doc.any_attribute(STATISTICS_INFO, TABLE_ATTR, &is_system_table) {
            return false;
        }
        !doc.any_attribute(STMT_SIMPLE, STATEMENT_TEXT_ATTR, &references_sys_schema)
    }

    /// Drop excluded records, keeping the ranking order of the rest
    pub fn retain(&self, records: Vec<PerformanceRecord>) -> Vec<PerformanceRecord> {
        records.into_iter().filter(|r| self.should_keep(r)).collect()
    }
}

fn is_system_table(table: &str) -> bool {
    starts_with_ignore_case(table, "sys") || starts_with_ignore_case(table, "[sys")
}

fn references_sys_schema(statement: &str) -> bool {
    statement.to_ascii_lowercase().contains(" sys.")
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
