use crate::model::Request;
use crate::store::StoreError;

use super::Repository;

/// Where a resolved group came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSource {
    /// The request already carries a group.
    Request,
    /// Group of the lab the request prefers.
    RequestPreference,
    /// Group of the requester's standing preferred lab.
    RequesterPreference,
    Default,
}

impl GroupSource {
    /// Lookup order. First hit wins.
    pub const CHAIN: [GroupSource; 4] = [
        GroupSource::Request,
        GroupSource::RequestPreference,
        GroupSource::RequesterPreference,
        GroupSource::Default,
    ];
}

/// Derives the lab group a request must be satisfied from.
#[derive(Debug, Clone)]
pub struct GroupResolver {
    default_group: String,
}

impl GroupResolver {
    pub fn new(default_group: impl Into<String>) -> Self {
        Self {
            default_group: default_group.into(),
        }
    }

    pub fn default_group(&self) -> &str {
        &self.default_group
    }

    pub fn resolve<R: Repository + ?Sized>(&self, repo: &R, request: &Request) -> Result<String, StoreError> {
        self.resolve_with_source(repo, request).map(|(group, _)| group)
    }

    pub fn resolve_with_source<R: Repository + ?Sized>(
        &self,
        repo: &R,
        request: &Request,
    ) -> Result<(String, GroupSource), StoreError> {
        for source in GroupSource::CHAIN {
            if let Some(group) = self.lookup(source, repo, request)? {
                return Ok((group, source));
            }
        }
        Ok((self.default_group.clone(), GroupSource::Default))
    }

    fn lookup<R: Repository + ?Sized>(
        &self,
        source: GroupSource,
        repo: &R,
        request: &Request,
    ) -> Result<Option<String>, StoreError> {
        let lab_id = match source {
            GroupSource::Request => return Ok(non_blank(request.group.as_deref())),
            GroupSource::Default => return Ok(Some(self.default_group.clone())),
            GroupSource::RequestPreference => request.preferred_lab,
            GroupSource::RequesterPreference => repo.get_requester_preferred_resource(request.requester_id)?,
        };
        let Some(lab_id) = lab_id else {
            return Ok(None);
        };
        Ok(repo
            .get_resource(lab_id)?
            .and_then(|lab| non_blank(Some(&lab.group))))
    }
}

fn non_blank(group: Option<&str>) -> Option<String> {
    group
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
}
