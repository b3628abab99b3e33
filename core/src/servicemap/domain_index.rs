//! DNS domain and regex matching against configured services.
//!
//! Domain strings from every service are compiled into a single shared
//! Aho-Corasick automaton rather than one automaton per service, so a
//! lookup is a single scan regardless of how many services are
//! configured. Matches are resolved leftmost-first: the earliest starting
//! position wins, and services configured earlier win ties at the same
//! starting position.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::Regex;

use super::{Service, ServiceId};
use crate::error::{RefineryError, Result};

struct RegexPattern {
    regex: Regex,
    services: Vec<ServiceId>,
}

/// Matches a DNS question name against configured domain strings (via a
/// shared Aho-Corasick automaton) and regexes (checked in service order
/// after the automaton finds nothing).
pub struct DomainIndex {
    automaton: Option<AhoCorasick>,
    domain_patterns: Vec<Vec<ServiceId>>,
    patterns: Vec<RegexPattern>,
}

impl Default for DomainIndex {
    fn default() -> Self {
        Self {
            automaton: None,
            domain_patterns: Vec::new(),
            patterns: Vec::new(),
        }
    }
}

impl DomainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_services(&mut self, services: &[Service]) -> Result<()> {
        let mut domains: Vec<String> = Vec::new();
        let mut domain_services: Vec<Vec<ServiceId>> = Vec::new();

        for service in services {
            for domain in &service.filter.domains_string {
                domains.push(domain.clone());
                domain_services.push(vec![service.code]);
            }
            for pattern in &service.filter.domains_regex {
                let regex = Regex::new(pattern)
                    .map_err(|e| RefineryError::InvalidRegex(pattern.clone(), e))?;
                self.patterns.push(RegexPattern {
                    regex,
                    services: vec![service.code],
                });
            }
        }

        if !domains.is_empty() {
            self.automaton = Some(
                AhoCorasickBuilder::new()
                    .match_kind(MatchKind::LeftmostFirst)
                    .build(&domains)
                    .map_err(|e| RefineryError::ServiceConfig(e.to_string()))?,
            );
            self.domain_patterns = domain_services;
        }

        Ok(())
    }

    /// Matches a question name, domains before regexes, first match wins.
    /// Returns the matched pattern string and its services.
    pub fn first_match(&self, question_name: &str) -> Option<(String, Vec<ServiceId>)> {
        if let Some(ac) = &self.automaton {
            if let Some(m) = ac.find(question_name) {
                let services = self.domain_patterns[m.pattern().as_usize()].clone();
                return Some((question_name[m.start()..m.end()].to_string(), services));
            }
        }

        for pattern in &self.patterns {
            if pattern.regex.is_match(question_name) {
                return Some((pattern.regex.as_str().to_string(), pattern.services.clone()));
            }
        }

        None
    }
}
