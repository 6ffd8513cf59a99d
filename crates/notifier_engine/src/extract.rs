use std::collections::BTreeSet;

use notifier_core::{PipelineId, Sample, TerminalStatus};
use scraper::{ElementRef, Html, Selector};

use crate::config::{ConfigError, MarkerConfig};
use crate::feed::MutationRecord;

/// Result of reading one page body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageReading {
    pub sample: Sample,
    /// Whether the pipeline listing container exists, i.e. whether a change
    /// subscription has anything to watch.
    pub has_listing: bool,
}

/// Reads pipeline state out of listing page markup.
#[derive(Debug, Clone)]
pub struct PipelineExtractor {
    running: Selector,
    pipeline_link: Selector,
    listing_row: Selector,
    listing_fallback: Selector,
    graph: Selector,
    markers: MarkerConfig,
}

fn parse_selector(raw: &str) -> Result<Selector, ConfigError> {
    Selector::parse(raw).map_err(|err| ConfigError::Selector {
        selector: raw.to_string(),
        message: err.to_string(),
    })
}

impl PipelineExtractor {
    pub fn new(markers: &MarkerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            running: parse_selector(&markers.running)?,
            pipeline_link: parse_selector(&markers.pipeline_link)?,
            listing_row: parse_selector(&markers.listing_row)?,
            listing_fallback: parse_selector(&markers.listing_fallback)?,
            graph: parse_selector(&markers.graph)?,
            markers: markers.clone(),
        })
    }

    /// Ids of every pipeline marked as running. Elements without a usable id
    /// are skipped.
    pub fn extract_running(&self, doc: &Html) -> BTreeSet<PipelineId> {
        doc.select(&self.running)
            .filter_map(|link| self.id_of(link))
            .collect()
    }

    /// Terminal status of `id` according to the first link for it that carries
    /// a status marker.
    pub fn classify(&self, doc: &Html, id: &PipelineId) -> TerminalStatus {
        doc.select(&self.pipeline_link)
            .filter(|link| self.id_of(*link).as_ref() == Some(id))
            .map(|link| self.status_of(link))
            .find(|status| status.is_determinate())
            .unwrap_or(TerminalStatus::Unknown)
    }

    /// Parses `html` and samples it against the previous running set. Only the
    /// ids that left the running set get classified.
    pub fn read_page(&self, html: &str, previous: &BTreeSet<PipelineId>) -> PageReading {
        let doc = Html::parse_document(html);
        let running = self.extract_running(&doc);
        let statuses = previous
            .difference(&running)
            .map(|id| (id.clone(), self.classify(&doc, id)))
            .collect();
        PageReading {
            has_listing: self.listing_container(&doc).is_some(),
            sample: Sample { running, statuses },
        }
    }

    /// Parent of the first listing row, else the first fallback container.
    pub fn listing_container<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        doc.select(&self.listing_row)
            .next()
            .and_then(|row| row.parent())
            .and_then(ElementRef::wrap)
            .or_else(|| doc.select(&self.listing_fallback).next())
    }

    /// Outer HTML of each direct child element of the listing container.
    pub fn listing_children(&self, html: &str) -> Option<Vec<String>> {
        let doc = Html::parse_document(html);
        let container = self.listing_container(&doc)?;
        Some(
            container
                .children()
                .filter_map(ElementRef::wrap)
                .map(|child| child.html())
                .collect(),
        )
    }

    /// Whether any added node in the batch is, or contains, a pipeline graph.
    pub fn batch_touches_pipelines(&self, batch: &[MutationRecord]) -> bool {
        batch
            .iter()
            .flat_map(|record| record.added_nodes.iter())
            .any(|node| {
                let fragment = Html::parse_fragment(node);
                fragment.select(&self.graph).next().is_some()
            })
    }

    fn id_of(&self, link: ElementRef<'_>) -> Option<PipelineId> {
        link.value()
            .attr("href")
            .and_then(|href| pipeline_id_from_href(href, &self.markers.id_prefix))
    }

    fn status_of(&self, link: ElementRef<'_>) -> TerminalStatus {
        let m = &self.markers;
        let has = |class: &str| link.value().classes().any(|c| c == class);
        if has(&m.icon_success) {
            TerminalStatus::Success
        } else if has(&m.icon_failed) || (has(&m.badge) && has(&m.badge_failed)) {
            TerminalStatus::Failed
        } else if has(&m.badge) && has(&m.badge_success) {
            TerminalStatus::Success
        } else {
            TerminalStatus::Unknown
        }
    }
}

/// Digits following the first occurrence of `prefix` that is followed by
/// at least one digit.
pub fn pipeline_id_from_href(href: &str, prefix: &str) -> Option<PipelineId> {
    if prefix.is_empty() {
        return None;
    }
    href.match_indices(prefix).find_map(|(at, _)| {
        let rest = &href[at + prefix.len()..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        (end > 0).then(|| PipelineId::new(&rest[..end]))
    })
}
