//! Endpoint configs, resource recipes, and the scaling-event audit log.

mod events;
mod model;
mod store;

pub use events::{PostgresScalingEventStore, ScalingAction, ScalingEvent, ScalingEventStore};
pub use model::{
    AutoscalerOverride, Endpoint, EndpointHealth, EndpointLifecycle, ResourceRecipe,
};
pub use store::{EndpointStore, PostgresEndpointStore, PostgresRecipeStore, RecipeStore};
