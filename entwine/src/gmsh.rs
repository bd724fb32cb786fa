//! Gmsh post-processing output for visual debugging.
//!
//! Writes `.pos` views: beams and sphere markers of the discretization,
//! hex outlines of the background mesh, and per-step contact glyphs (a
//! gap-colored point plus a force vector at every contact point).

use crate::mesh::{Discretization, Shape};
use crate::pairs::beam_beam::BeamCurve;
use crate::pairs::PairRegistry;
use crate::{Error, Vector3};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One named Gmsh view accumulating parsed-post-processing primitives.
pub struct GmshView {
    name: String,
    items: Vec<String>,
}

fn coords(points: &[&Vector3]) -> String {
    points
        .iter()
        .map(|p| format!("{:.9e},{:.9e},{:.9e}", p.x, p.y, p.z))
        .collect::<Vec<_>>()
        .join(",")
}

impl GmshView {
    pub fn new(name: impl Into<String>) -> Self {
        GmshView {
            name: name.into(),
            items: Vec::new(),
        }
    }

    /// Scalar line (`SL`).
    pub fn add_line(&mut self, a: &Vector3, b: &Vector3, value: f64) {
        self.items.push(format!(
            "SL({}){{{:.9e},{:.9e}}};",
            coords(&[a, b]),
            value,
            value
        ));
    }

    /// Scalar point (`SP`).
    pub fn add_point(&mut self, p: &Vector3, value: f64) {
        self.items
            .push(format!("SP({}){{{:.9e}}};", coords(&[p]), value));
    }

    /// Vector point (`VP`).
    pub fn add_vector(&mut self, p: &Vector3, v: &Vector3) {
        self.items.push(format!(
            "VP({}){{{:.9e},{:.9e},{:.9e}}};",
            coords(&[p]),
            v.x,
            v.y,
            v.z
        ));
    }

    /// Scalar triangle (`ST`).
    pub fn add_triangle(&mut self, p: [&Vector3; 3], value: f64) {
        self.items.push(format!(
            "ST({}){{{:.9e},{:.9e},{:.9e}}};",
            coords(&p),
            value,
            value,
            value
        ));
    }

    /// Scalar quadrangle (`SQ`).
    pub fn add_quad(&mut self, p: [&Vector3; 4], value: f64) {
        self.items.push(format!(
            "SQ({}){{{:.9e},{:.9e},{:.9e},{:.9e}}};",
            coords(&p),
            value,
            value,
            value,
            value
        ));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn write_to(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "View \"{}\" {{", self.name)?;
        for item in &self.items {
            writeln!(w, "{}", item)?;
        }
        writeln!(w, "}};")
    }
}

/// Edges of the reference hexahedron by corner index.
const HEX_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Geometry view of a deformed discretization: beam centerlines colored by
/// cross-section radius, sphere markers, surface facets and hex outlines.
pub fn discretization_view(disc: &Discretization, positions: &[Vector3]) -> GmshView {
    let mut view = GmshView::new("discretization");
    for e in disc.elements() {
        let p = |i: usize| &positions[e.nodes[i].index()];
        match e.shape {
            Shape::BeamLine2 => view.add_line(p(0), p(1), e.radius()),
            Shape::BeamLine3 => {
                // End nodes first, middle node last.
                view.add_line(p(0), p(2), e.radius());
                view.add_line(p(2), p(1), e.radius());
            }
            Shape::Sphere1 => view.add_point(p(0), e.radius()),
            Shape::Tri3 => view.add_triangle([p(0), p(1), p(2)], 0.0),
            Shape::Quad4 => view.add_quad([p(0), p(1), p(2), p(3)], 0.0),
            Shape::Hex8 | Shape::Hex20 => {
                for (a, b) in HEX_EDGES {
                    view.add_line(p(a), p(b), 0.0);
                }
            }
        }
    }
    view
}

/// Contact glyphs for the active pairs: gap-colored points and force
/// vectors along the contact normals.
pub fn contact_view(
    disc: &Discretization,
    positions: &[Vector3],
    registry: &PairRegistry,
) -> GmshView {
    let mut view = GmshView::new("contact");
    for pair in registry.pairs() {
        if !pair.contact_flag() {
            continue;
        }
        let (e1, _) = pair.elems();
        let curve =
            BeamCurve::from_element(disc, positions, e1, crate::config::Smoothing::None);
        for cp in pair.contact_points() {
            let (p, _, _) = curve.eval(cp.xi1);
            view.add_point(&p, cp.gap);
            view.add_vector(&p, &(cp.normal * cp.force));
        }
    }
    view
}

/// Write the geometry and contact views of one step to a `.pos` file.
pub fn write_step(
    path: &Path,
    disc: &Discretization,
    positions: &[Vector3],
    registry: &PairRegistry,
) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    discretization_view(disc, positions).write_to(&mut w)?;
    let contacts = contact_view(disc, positions, registry);
    if !contacts.is_empty() {
        contacts.write_to(&mut w)?;
    }
    w.flush()?;
    Ok(())
}
