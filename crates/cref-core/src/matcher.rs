use crate::constants::facets as facet_names;
use crate::errors::MatchError;
use crate::model::{DataRequirement, Dataset, DatasetSelection, Diagnostic, ExecutionKey, Facets};
use std::collections::BTreeMap;
use wildmatch::WildMatch;

/// Enumerate the minimal dataset combinations in `datasets` that satisfy
/// `diagnostic`'s data requirements.
///
/// Deterministic by construction: grouping and key derivation work on sorted
/// facet maps, never on catalog traversal order. An empty result means the
/// diagnostic is currently unsatisfiable, which is not an error.
pub fn match_diagnostic(
    diagnostic: &Diagnostic,
    datasets: &[Dataset],
) -> Result<BTreeMap<ExecutionKey, DatasetSelection>, MatchError> {
    for requirement in &diagnostic.requirements {
        validate_requirement(diagnostic, requirement)?;
    }

    // Partial selections accumulated across requirements. Starts from the
    // empty selection so the first requirement's groups seed the set.
    let mut partials: Vec<(Facets, Vec<Dataset>)> = vec![(Facets::new(), Vec::new())];

    for requirement in &diagnostic.requirements {
        let groups = group_for_requirement(requirement, datasets);
        if groups.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut next: Vec<(Facets, Vec<Dataset>)> = Vec::new();
        for (partial_facets, partial_datasets) in &partials {
            for (group_facets, group_datasets) in &groups {
                // Combinations must agree on facets shared between
                // requirements; a cmip6 selection for MIROC6 never pairs
                // with an obs selection grouped to another source_id.
                let consistent = group_facets
                    .iter()
                    .all(|(k, v)| partial_facets.get(k).map(|p| p == v).unwrap_or(true));
                if !consistent {
                    continue;
                }

                let mut merged_facets = partial_facets.clone();
                merged_facets.extend(group_facets.clone());
                let mut merged_datasets = partial_datasets.clone();
                merged_datasets.extend(group_datasets.iter().map(|d| (*d).clone()));
                next.push((merged_facets, merged_datasets));
            }
        }
        partials = next;
    }

    let mut result: BTreeMap<ExecutionKey, DatasetSelection> = BTreeMap::new();
    for (key_facets, mut selected) in partials {
        selected.sort_by(|a, b| {
            (a.source_type, a.identity()).cmp(&(b.source_type, b.identity()))
        });
        selected.dedup_by(|a, b| a.source_type == b.source_type && a.identity() == b.identity());

        let key = ExecutionKey::from_facets(&key_facets);
        result.entry(key).or_insert(DatasetSelection {
            key_facets,
            datasets: selected,
        });
    }

    Ok(result)
}

fn validate_requirement(
    diagnostic: &Diagnostic,
    requirement: &DataRequirement,
) -> Result<(), MatchError> {
    if requirement.group_by.is_empty() {
        return Err(MatchError::EmptyGroupBy {
            diagnostic: diagnostic.slug.clone(),
        });
    }
    for filter in &requirement.filters {
        if filter.values.is_empty() {
            return Err(MatchError::EmptyFilterValues {
                diagnostic: diagnostic.slug.clone(),
                facet: filter.facet.clone(),
            });
        }
    }
    let known = facet_names::required(requirement.source_type);
    for facet in &requirement.group_by {
        if !known.contains(&facet.as_str()) {
            return Err(MatchError::UnknownGroupFacet {
                diagnostic: diagnostic.slug.clone(),
                facet: facet.clone(),
                source_type: requirement.source_type.to_string(),
            });
        }
    }
    Ok(())
}

fn group_for_requirement<'a>(
    requirement: &DataRequirement,
    datasets: &'a [Dataset],
) -> BTreeMap<Facets, Vec<&'a Dataset>> {
    let matchers: Vec<(&str, Vec<WildMatch>)> = requirement
        .filters
        .iter()
        .map(|f| {
            (
                f.facet.as_str(),
                f.values.iter().map(|v| WildMatch::new(v)).collect(),
            )
        })
        .collect();

    let mut groups: BTreeMap<Facets, Vec<&Dataset>> = BTreeMap::new();
    for dataset in datasets {
        if dataset.source_type != requirement.source_type {
            continue;
        }
        let passes = matchers.iter().all(|(facet, patterns)| {
            dataset
                .facets
                .get(*facet)
                .is_some_and(|value| patterns.iter().any(|p| p.matches(value)))
        });
        if !passes {
            continue;
        }

        let Some(key_facets) = extract_group_facets(&requirement.group_by, dataset) else {
            continue;
        };
        groups.entry(key_facets).or_default().push(dataset);
    }
    groups
}

fn extract_group_facets(group_by: &[String], dataset: &Dataset) -> Option<Facets> {
    let mut key_facets = Facets::new();
    for facet in group_by {
        let value = dataset.facets.get(facet)?;
        key_facets.insert(facet.clone(), value.clone());
    }
    Some(key_facets)
}
