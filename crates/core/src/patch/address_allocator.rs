use luminet_fixtures::{FixtureTemplate, Patch, DMX_CHANNELS};
use serde::{Deserialize, Serialize};

use crate::error::AddressError;

const MAX_ADDRESS: u32 = DMX_CHANNELS as u32;

/// A closed interval of channels occupied by one patch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsedRange {
    pub start: u16,
    pub end: u16,
    pub patch_id: String,
}

impl UsedRange {
    fn overlaps(&self, start: u32, end: u32) -> bool {
        !(end < self.start as u32 || start > self.end as u32)
    }
}

/// Outcome of a placement query, shaped for the address check endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressCheck {
    pub can_fit: bool,
    pub addresses: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub channels_per_fixture: u16,
    pub total_channels: u32,
}

impl AddressCheck {
    pub fn from_result(width: u16, result: Result<Vec<u16>, AddressError>) -> Self {
        match result {
            Ok(addresses) => Self {
                can_fit: true,
                total_channels: addresses.len() as u32 * width as u32,
                addresses,
                error: None,
                channels_per_fixture: width,
            },
            Err(e) => Self {
                can_fit: false,
                addresses: e.placed().to_vec(),
                error: Some(e.to_string()),
                channels_per_fixture: width,
                total_channels: 0,
            },
        }
    }
}

/// Answers placement questions against the current patch list.
///
/// Borrowing the collections keeps the allocator a pure view: it never
/// mutates patches, it only reports what would fit.
pub struct AddressAllocator<'a> {
    patches: &'a [Patch],
    templates: &'a [FixtureTemplate],
}

impl<'a> AddressAllocator<'a> {
    pub fn new(patches: &'a [Patch], templates: &'a [FixtureTemplate]) -> Self {
        Self { patches, templates }
    }

    /// Occupied ranges in `universe`, in patch order. Patches whose template
    /// is missing occupy nothing.
    pub fn used_ranges(&self, universe: u16) -> Vec<UsedRange> {
        self.patches
            .iter()
            .filter(|p| p.universe == universe)
            .filter_map(|p| {
                let template = self.templates.iter().find(|t| t.id == p.template_id)?;
                Some(UsedRange {
                    start: p.start_address,
                    end: p.end_address(template.channel_count),
                    patch_id: p.id.clone(),
                })
            })
            .collect()
    }

    pub fn has_conflict(
        &self,
        universe: u16,
        start: u16,
        width: u16,
        exclude_patch_id: Option<&str>,
    ) -> Result<bool, AddressError> {
        validate_width(width)?;
        validate_address(start)?;
        let ranges = self.used_ranges(universe);
        Ok(first_conflict(&ranges, start as u32, width, exclude_patch_id).is_some())
    }

    /// Like `has_conflict`, but reports why a single placement is refused.
    pub fn check_placement(
        &self,
        universe: u16,
        start: u16,
        width: u16,
        exclude_patch_id: Option<&str>,
    ) -> Result<(), AddressError> {
        validate_width(width)?;
        validate_address(start)?;
        let ranges = self.used_ranges(universe);
        let end = start as u32 + width as u32 - 1;

        if let Some(range) = first_conflict(&ranges, start as u32, width, exclude_patch_id) {
            return Err(AddressError::Conflict {
                start,
                end: end.min(MAX_ADDRESS) as u16,
                conflicting: range.clone(),
                placed: Vec::new(),
            });
        }
        if end > MAX_ADDRESS {
            return Err(AddressError::ExceedsLimit {
                address: start,
                width,
                placed: Vec::new(),
            });
        }
        Ok(())
    }

    /// Lowest address at or after `from` where a `width`-channel block fits.
    pub fn find_next_available(
        &self,
        universe: u16,
        width: u16,
        from: u16,
    ) -> Result<Option<u16>, AddressError> {
        validate_width(width)?;
        validate_address(from)?;
        let ranges = self.used_ranges(universe);
        let last_start = MAX_ADDRESS + 1 - width as u32;

        Ok((from as u32..=last_start)
            .find(|&address| first_conflict(&ranges, address, width, None).is_none())
            .map(|address| address as u16))
    }

    /// Places `quantity` blocks back to back starting at `start_from`.
    ///
    /// Each block starts `width` channels after the previous one; the first
    /// block that collides or runs past channel 512 aborts the search and
    /// the error carries the addresses already placed.
    pub fn find_bulk(
        &self,
        universe: u16,
        width: u16,
        quantity: usize,
        start_from: u16,
    ) -> Result<Vec<u16>, AddressError> {
        validate_width(width)?;
        validate_address(start_from)?;
        if quantity == 0 {
            return Err(AddressError::InvalidQuantity);
        }

        let ranges = self.used_ranges(universe);
        let mut placed = Vec::with_capacity(quantity);
        let mut current = start_from as u32;

        for _ in 0..quantity {
            let end = current + width as u32 - 1;
            if let Some(range) = first_conflict(&ranges, current, width, None) {
                log::debug!(
                    "Bulk placement blocked at {}-{} by patch {}",
                    current,
                    end,
                    range.patch_id
                );
                return Err(AddressError::Conflict {
                    start: current as u16,
                    end: end as u16,
                    conflicting: range.clone(),
                    placed,
                });
            }
            if end > MAX_ADDRESS {
                return Err(AddressError::ExceedsLimit {
                    address: current as u16,
                    width,
                    placed,
                });
            }
            placed.push(current as u16);
            current += width as u32;
        }

        Ok(placed)
    }
}

fn first_conflict<'r>(
    ranges: &'r [UsedRange],
    start: u32,
    width: u16,
    exclude_patch_id: Option<&str>,
) -> Option<&'r UsedRange> {
    let end = start + width as u32 - 1;
    ranges
        .iter()
        .filter(|r| exclude_patch_id != Some(r.patch_id.as_str()))
        .find(|r| r.overlaps(start, end))
}

fn validate_width(width: u16) -> Result<(), AddressError> {
    if width == 0 || width as u32 > MAX_ADDRESS {
        return Err(AddressError::InvalidWidth(width));
    }
    Ok(())
}

pub(crate) fn validate_address(address: u16) -> Result<(), AddressError> {
    if address == 0 || address as u32 > MAX_ADDRESS {
        return Err(AddressError::InvalidAddress(address));
    }
    Ok(())
}
