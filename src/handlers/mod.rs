mod health;

pub use health::{
    ActuatorHealthResponse, HealthResponse, ReadinessResponse, actuator_health, actuator_routes,
    health_check, readiness_check,
};
