//! Linear elasticity on P1 triangles with static condensation of Dirichlet
//! nodes.

pub mod assembly;
pub mod datatypes;
pub mod element;
pub mod error;
pub mod geometry;
pub mod input;
pub mod material;
pub mod mesher;
pub mod post_processor;
pub mod problem;
pub mod simulation;
pub mod solver;
