//! Wall and pairwise collision resolution.

use crate::config::CollisionResponse;
use crate::model::{Axis, Particle};
use anyhow::Result;

/// Pair of particles in contact at the start of pairwise resolution.
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    pub i: usize,
    pub j: usize,
    /// Unit vector from `i` to `j`.
    pub unit: [f64; 2],
    pub dist: f64,
}

/// Reflect particles whose leading edge reached a wall while moving outward.
///
/// A particle past a wall is put back in contact with it.
pub fn resolve_walls(particles: &mut [Particle], domain: [f64; 2]) {
    for part in particles.iter_mut() {
        let [x, y] = part.pos();
        let [vx, vy] = part.vel();
        let radius = part.radius();

        if (x <= radius && vx < 0.0) || (x >= domain[0] - radius && vx > 0.0) {
            part.reflect(Axis::X);
        }
        if (y <= radius && vy < 0.0) || (y >= domain[1] - radius && vy > 0.0) {
            part.reflect(Axis::Y);
        }
        keep_inside(part, domain);
    }
}

/// Move the center of `part` into `[r, W - r] x [r, H - r]`.
fn keep_inside(part: &mut Particle, domain: [f64; 2]) {
    let radius = part.radius();
    let [x, y] = part.pos();
    let x_in = x.clamp(radius, domain[0] - radius);
    let y_in = y.clamp(radius, domain[1] - radius);
    part.displace([x_in - x, y_in - y]);
}

/// Find every unordered pair closer than `2 * contact_radius`.
///
/// Pairs are listed in ascending `(i, j)` order with `i < j`.
pub fn find_contacts(particles: &[Particle], contact_radius: f64) -> Vec<Contact> {
    let min_dist = 2.0 * contact_radius;
    let mut contacts = Vec::new();
    for (i, part_i) in particles.iter().enumerate() {
        let [xi, yi] = part_i.pos();
        for (j, part_j) in particles.iter().enumerate().skip(i + 1) {
            let [xj, yj] = part_j.pos();
            let diff = [xj - xi, yj - yi];
            let dist = diff[0].hypot(diff[1]);
            if dist >= min_dist {
                continue;
            }
            // Coincident centers have no defined normal; push along x.
            let unit = if dist > 0.0 {
                [diff[0] / dist, diff[1] / dist]
            } else {
                [1.0, 0.0]
            };
            contacts.push(Contact { i, j, unit, dist });
        }
    }
    contacts
}

/// Resolve every contact once, in canonical order.
///
/// For each pair the normal velocity response is applied to both particles,
/// then `j` is pushed out to exact tangency, then `on_contact` runs (used for
/// transmission). Chained contacts are not re-resolved within the step.
///
/// A push is cut short at the walls of `domain`, so a pair pressed against
/// a wall may be left overlapping.
pub fn resolve_pairs<F>(
    particles: &mut [Particle],
    domain: [f64; 2],
    contact_radius: f64,
    response: CollisionResponse,
    mut on_contact: F,
) -> Result<usize>
where
    F: FnMut(&mut [Particle], &Contact) -> Result<()>,
{
    let contacts = find_contacts(particles, contact_radius);

    let factor = match response {
        CollisionResponse::Reflect => 2.0,
        CollisionResponse::Absorb => 1.0,
    };

    for contact in &contacts {
        let Contact { i, j, unit, dist } = *contact;

        for idx in [i, j] {
            let part = &mut particles[idx];
            let [vx, vy] = part.vel();
            let normal = factor * (unit[0] * vx + unit[1] * vy);
            part.set_vel([vx - normal * unit[0], vy - normal * unit[1]]);
        }

        let depth = 2.0 * contact_radius - dist;
        particles[j].displace([depth * unit[0], depth * unit[1]]);
        keep_inside(&mut particles[j], domain);

        on_contact(particles, contact)?;
    }

    Ok(contacts.len())
}
