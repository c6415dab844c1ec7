//! Resource names accepted on the command line, with aliases and
//! best-match resolution.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;

use crate::backend::{parse_filter, Resource};

#[derive(Debug, Clone)]
pub struct ResourceName {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All resources the CLI can fetch
pub const RESOURCES: &[ResourceName] = &[
  ResourceName {
    name: "complaints",
    aliases: &["c", "list"],
    description: "Complaint list (accepts --filter key=value)",
  },
  ResourceName {
    name: "dashboard_stats",
    aliases: &["d", "dashboard", "stats"],
    description: "Dashboard counters",
  },
  ResourceName {
    name: "complaint",
    aliases: &["one", "detail"],
    description: "A single complaint (requires --id)",
  },
];

/// Get resource names matching `input`, best match first
pub fn get_suggestions(input: &str) -> Vec<&'static ResourceName> {
  let input_lower = input.trim().to_lowercase().replace('-', "_");

  if input_lower.is_empty() {
    return RESOURCES.iter().collect();
  }

  let mut matches: Vec<(&ResourceName, u32)> = Vec::new();

  for res in RESOURCES {
    if res.name == input_lower {
      matches.push((res, 0));
      continue;
    }

    if res.aliases.contains(&input_lower.as_str()) {
      matches.push((res, 1));
      continue;
    }

    if res.name.starts_with(&input_lower) {
      matches.push((res, 2));
      continue;
    }

    if res.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((res, 3));
      continue;
    }

    if res.name.contains(&input_lower) {
      matches.push((res, 4));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(res, _)| res).collect()
}

/// Turn command-line arguments into a [`Resource`].
pub fn resolve(name: &str, filters: &[String], id: Option<&str>) -> Result<Resource> {
  let suggestions = get_suggestions(name);
  let best = suggestions.first().ok_or_else(|| {
    let known: Vec<&str> = RESOURCES.iter().map(|r| r.name).collect();
    eyre!("Unknown resource {}; expected one of {}", name, known.join(", "))
  })?;

  match best.name {
    "complaints" => {
      let filters = filters
        .iter()
        .map(|f| parse_filter(f))
        .collect::<Result<BTreeMap<_, _>>>()?;
      Ok(Resource::Complaints { filters })
    }
    "dashboard_stats" => Ok(Resource::DashboardStats),
    _ => {
      let id = id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| eyre!("Fetching a single complaint requires --id"))?;
      Ok(Resource::Complaint { id: id.to_string() })
    }
  }
}
