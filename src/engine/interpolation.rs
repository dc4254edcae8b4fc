//! Initial chain construction between two (or three) structures.

use log::{debug, info};

use crate::core::chain::{Chain, SpringConstants};
use crate::core::config::{InterpolationConfig, InterpolationScheme};
use crate::core::domain::AtomicStructure;
use crate::engine::external::interp_tool::GeometryTool;
use crate::engine::idpp::IdppObjective;
use crate::engine::minimizer::{Fire, FireParams, StopCriteria};
use crate::error::{NebError, Result};
use crate::solvers::relax::relax_band;

pub struct Interpolator {
    config: InterpolationConfig,
    fire: FireParams,
}

impl Interpolator {
    pub fn new(config: InterpolationConfig, fire: FireParams) -> Self {
        Self { config, fire }
    }

    /// Builds a chain of `nimages` images from `reactant` to `product`.
    pub fn interpolate(
        &self,
        reactant: &AtomicStructure,
        product: &AtomicStructure,
        nimages: usize,
    ) -> Result<Chain> {
        check_request(reactant, product, nimages)?;
        info!("interpolating {} images using {} scheme", nimages, self.config.scheme);
        Chain::new(self.path(reactant, None, product, nimages)?)
    }

    /// Builds a chain of `nimages` images that passes through `waypoint`.
    ///
    /// The left half (reactant to waypoint) gets `n/2 + n%2` images, the
    /// right half (waypoint to product) gets `n/2 + 1`; the shared waypoint
    /// image appears once.
    pub fn interpolate_with_waypoint(
        &self,
        reactant: &AtomicStructure,
        waypoint: &AtomicStructure,
        product: &AtomicStructure,
        nimages: usize,
    ) -> Result<Chain> {
        check_request(reactant, product, nimages)?;
        if !waypoint.same_species(reactant) {
            return Err(NebError::Configuration(
                "waypoint differs from the endpoints in atom count or species order".into(),
            ));
        }
        info!(
            "interpolating {} images through a waypoint using {} scheme",
            nimages, self.config.scheme
        );

        if let InterpolationScheme::External(_) = self.config.scheme {
            return Chain::new(self.path(reactant, Some(waypoint), product, nimages)?);
        }

        let npart = nimages / 2;
        let rem = nimages % 2;
        let left = self.path(reactant, None, waypoint, npart + rem)?;
        let right = self.path(waypoint, None, product, npart + 1)?;

        let mut images = left;
        images.extend(right.into_iter().skip(1));
        debug_assert_eq!(images.len(), nimages);
        Chain::new(images)
    }

    /// Frames of one path segment; `nimages` may be as small as 2.
    fn path(
        &self,
        from: &AtomicStructure,
        waypoint: Option<&AtomicStructure>,
        to: &AtomicStructure,
        nimages: usize,
    ) -> Result<Vec<AtomicStructure>> {
        match &self.config.scheme {
            InterpolationScheme::Linear => linear(from, to, nimages),
            InterpolationScheme::Idpp => self.idpp(from, to, nimages),
            InterpolationScheme::External(flag) => {
                let tool = GeometryTool::new(&self.config.geometry_tool);
                let frames = tool.run(from, waypoint, to, nimages, flag)?;
                adopt_frames(from, to, &frames)
            }
        }
    }

    fn idpp(
        &self,
        from: &AtomicStructure,
        to: &AtomicStructure,
        nimages: usize,
    ) -> Result<Vec<AtomicStructure>> {
        let images = linear(from, to, nimages)?;
        if nimages < 3 {
            return Ok(images);
        }

        let mut chain = Chain::new(images)?;
        let mut objective = IdppObjective::new(from, to, nimages)?;
        let mut fire = Fire::new(self.fire.clone());
        let criteria = StopCriteria {
            fmax: self.config.idpp_fmax,
            max_steps: self.config.idpp_max_steps,
        };
        let report = relax_band(
            &mut chain,
            &mut objective,
            &mut fire,
            &SpringConstants::uniform(),
            None,
            criteria,
        )?;
        debug!(
            "IDPP relaxation: {} steps, fmax = {:.4}, converged = {}",
            report.steps, report.fmax, report.converged
        );
        Ok(chain.into_structures())
    }
}

fn check_request(reactant: &AtomicStructure, product: &AtomicStructure, nimages: usize) -> Result<()> {
    if nimages < 3 {
        return Err(NebError::Configuration(format!(
            "need at least 3 images, got {}",
            nimages
        )));
    }
    if !reactant.same_species(product) {
        return Err(NebError::Configuration(
            "reactant and product differ in atom count or species order".into(),
        ));
    }
    Ok(())
}

/// Straight-line interpolation in Cartesian space.
///
/// Endpoints are clones of the inputs; interior images are clones of
/// `from` with moved positions, so title and constraint mask carry over.
pub fn linear(
    from: &AtomicStructure,
    to: &AtomicStructure,
    nimages: usize,
) -> Result<Vec<AtomicStructure>> {
    if nimages < 2 {
        return Err(NebError::Configuration(format!(
            "a path segment needs at least 2 images, got {}",
            nimages
        )));
    }
    if !from.same_species(to) {
        return Err(NebError::Configuration(
            "path segment endpoints differ in atom count or species order".into(),
        ));
    }

    let mut images = Vec::with_capacity(nimages);
    images.push(from.clone());
    for i in 1..nimages - 1 {
        let t = i as f64 / (nimages - 1) as f64;
        let positions: Vec<_> = from
            .atoms
            .iter()
            .zip(&to.atoms)
            .map(|(a, b)| a.position + t * (b.position - a.position))
            .collect();
        let mut image = from.clone();
        image.set_positions(&positions)?;
        images.push(image);
    }
    images.push(to.clone());
    Ok(images)
}

/// Takes interior coordinates from tool output; endpoints stay the inputs.
fn adopt_frames(
    from: &AtomicStructure,
    to: &AtomicStructure,
    frames: &[AtomicStructure],
) -> Result<Vec<AtomicStructure>> {
    let n = frames.len();
    let mut images = Vec::with_capacity(n);
    images.push(from.clone());
    for frame in &frames[1..n - 1] {
        if !frame.same_species(from) {
            return Err(NebError::ExternalTool(
                "interpolated frame differs in atom count or species order".into(),
            ));
        }
        let mut image = from.clone();
        image.set_positions(&frame.positions())?;
        images.push(image);
    }
    images.push(to.clone());
    Ok(images)
}
