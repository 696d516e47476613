//! User-facing status texts (Spanish).

use super::StatusUpdate;

pub const MONITORING_TITLE: &str = "Registro automático activo";

/// Steady status shown while tracking.
pub fn monitoring(trigger_distance_m: f64) -> StatusUpdate {
    StatusUpdate::new(
        MONITORING_TITLE,
        format!("Se medirá el ruido cada {trigger_distance_m:.0} m recorridos"),
    )
}

/// Live progress towards the next capture.
pub fn progress(distance_m: f64, trigger_distance_m: f64) -> StatusUpdate {
    StatusUpdate::new(
        MONITORING_TITLE,
        format!("Recorridos {distance_m:.0} m de {trigger_distance_m:.0} m"),
    )
}

/// Transient notice after a successful save.
pub fn new_record(level_db: f64, address: &str) -> StatusUpdate {
    StatusUpdate::new(
        "Nuevo registro de ruido",
        format!("{level_db:.1} dB en {address}"),
    )
}

pub fn capture_failed(reason: &str) -> StatusUpdate {
    StatusUpdate::new(
        "Error al guardar la medición",
        format!("No se pudo guardar el registro: {reason}"),
    )
}

pub const POSITION_LOST_TITLE: &str = "Ubicación no disponible";

/// The position stream ended while tracking.
pub fn position_lost() -> StatusUpdate {
    StatusUpdate::new(
        POSITION_LOST_TITLE,
        "Se perdió la señal de ubicación; inicia de nuevo el registro",
    )
}

pub fn session_stopped() -> StatusUpdate {
    StatusUpdate::new("Registro automático detenido", "Ya no se están tomando medidas")
}
