//! Robots.txt parser and checker.
//!
//! Groups are keyed by user-agent token; a URL path is matched against the
//! most specific group for the agent and the longest matching rule wins,
//! with `Allow` winning ties. `*` and a trailing `$` are supported in rule
//! paths.

use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;

/// Parsed robots.txt rules.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    /// Rules per user-agent (lowercase)
    rules: HashMap<String, AgentRules>,

    /// Default rules (for *)
    default_rules: AgentRules,

    /// Sitemaps listed
    sitemaps: Vec<String>,
}

/// Rules for a specific user-agent.
#[derive(Debug, Clone, Default)]
pub struct AgentRules {
    rules: Vec<PathRule>,

    /// Crawl delay for this agent
    crawl_delay: Option<f64>,
}

#[derive(Debug, Clone)]
struct PathRule {
    allow: bool,
    /// Original path length, used for precedence
    specificity: usize,
    pattern: Regex,
}

impl PathRule {
    fn new(path: &str, allow: bool) -> Option<Self> {
        let (body, anchored) = match path.strip_suffix('$') {
            Some(body) => (body, true),
            None => (path, false),
        };
        let mut expr = String::from("^");
        for (i, part) in body.split('*').enumerate() {
            if i > 0 {
                expr.push_str(".*");
            }
            expr.push_str(&regex::escape(part));
        }
        if anchored {
            expr.push('$');
        }
        Some(Self {
            allow,
            specificity: path.len(),
            pattern: Regex::new(&expr).ok()?,
        })
    }
}

impl AgentRules {
    fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<&PathRule> = None;
        for rule in self.rules.iter().filter(|r| r.pattern.is_match(path)) {
            best = match best {
                Some(current)
                    if current.specificity > rule.specificity
                        || (current.specificity == rule.specificity && current.allow) =>
                {
                    Some(current)
                }
                _ => Some(rule),
            };
        }
        best.map(|r| r.allow).unwrap_or(true)
    }
}

impl RobotsTxt {
    /// Parse robots.txt content.
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules = AgentRules::default();
        let mut in_rules = false;

        for line in content.lines() {
            // Strip trailing comments
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    // A user-agent line after rules starts a new group
                    if in_rules {
                        robots.save_group(&current_agents, &current_rules);
                        current_agents.clear();
                        current_rules = AgentRules::default();
                        in_rules = false;
                    }
                    current_agents.push(value.to_lowercase());
                }
                "disallow" | "allow" => {
                    in_rules = true;
                    // Empty disallow means allow everything
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(rule) = PathRule::new(value, directive == "allow") {
                        current_rules.rules.push(rule);
                    }
                }
                "crawl-delay" => {
                    in_rules = true;
                    if let Ok(delay) = value.parse::<f64>() {
                        current_rules.crawl_delay = Some(delay);
                    }
                }
                "sitemap" => {
                    // Sitemap lines are global; value may itself contain ':'
                    robots.sitemaps.push(value.to_string());
                }
                _ => {}
            }
        }

        robots.save_group(&current_agents, &current_rules);
        robots
    }

    fn save_group(&mut self, agents: &[String], rules: &AgentRules) {
        for agent in agents {
            if agent == "*" {
                self.default_rules = rules.clone();
            } else {
                self.rules.insert(agent.clone(), rules.clone());
            }
        }
    }

    fn rules_for(&self, user_agent: &str) -> &AgentRules {
        let agent_lower = user_agent.to_lowercase();
        self.rules
            .get(&agent_lower)
            .or_else(|| {
                // Product token match, e.g. "MyBot/1.0" against group "mybot"
                self.rules
                    .iter()
                    .filter(|(k, _)| agent_lower.contains(k.as_str()))
                    .max_by_key(|(k, _)| k.len())
                    .map(|(_, v)| v)
            })
            .unwrap_or(&self.default_rules)
    }

    /// Check if a path (with optional query) is allowed for a user-agent.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        self.rules_for(user_agent).is_allowed(path)
    }

    /// Check an absolute URL.
    pub fn is_url_allowed(&self, user_agent: &str, url: &url::Url) -> bool {
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        self.is_allowed(user_agent, &path)
    }

    /// Get crawl delay for a user-agent.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.rules_for(user_agent)
            .crawl_delay
            .map(Duration::from_secs_f64)
    }

    /// Get listed sitemaps.
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Check if robots.txt disallows all crawling.
    pub fn disallows_all(&self, user_agent: &str) -> bool {
        !self.is_allowed(user_agent, "/")
    }
}
