//! Customer-facing texts. Everything the bot says lives here so the machine
//! only decides which message to send.

use chrono::{NaiveDate, NaiveTime};
use turnero_core::booking::RejectionReason;
use turnero_core::clock::{display_date, format_time};
use turnero_core::domain::reservation::{Reservation, ReservationCode};

const MENU: &str = "¿Qué querés hacer?\n\
1. Reservar una mesa\n\
2. Modificar una reserva\n\
3. Cancelar una reserva\n\
4. Consultar mis reservas\n\n\
En cualquier momento podés escribir \"menu\" para volver acá.";

pub fn welcome() -> String {
    "¡Hola! Soy el asistente de reservas. Para empezar, escribí tu número de DNI \
     (7 u 8 dígitos)."
        .to_owned()
}

pub fn ask_identity_again() -> String {
    "No reconocí ese número. Escribí tu DNI con 7 u 8 dígitos, sin letras.".to_owned()
}

pub fn ask_name() -> String {
    "No te encontramos registrado. ¿Cuál es tu nombre y apellido?".to_owned()
}

pub fn ask_name_again() -> String {
    "Necesito tu nombre, con al menos dos letras y sin números. ¿Cómo te llamás?".to_owned()
}

pub fn ask_email(first_name: &str) -> String {
    format!(
        "Gracias, {first_name}. Si querés recibir las confirmaciones por email, escribilo \
         ahora. Si no, respondé \"no\"."
    )
}

pub fn ask_email_again() -> String {
    "Ese email no parece válido. Probá de nuevo o respondé \"no\" para seguir sin email."
        .to_owned()
}

pub fn menu() -> String {
    MENU.to_owned()
}

pub fn welcome_back(first_name: &str) -> String {
    format!("¡Hola de nuevo, {first_name}!\n\n{MENU}")
}

pub fn email_saved() -> String {
    format!("Guardamos tu email.\n\n{MENU}")
}

pub fn not_understood() -> String {
    format!("No entendí tu mensaje.\n\n{MENU}")
}

pub fn back_to_menu() -> String {
    format!("Volvemos al menú.\n\n{MENU}")
}

pub fn declined() -> String {
    format!("Listo, no hice ningún cambio.\n\n{MENU}")
}

pub fn ask_date() -> String {
    "¿Para qué fecha? Podés escribir \"hoy\", \"mañana\" o una fecha como 12/03.".to_owned()
}

pub fn date_again() -> String {
    "No entendí la fecha. Escribila como día/mes (por ejemplo 12/03) o \"mañana\".".to_owned()
}

pub fn date_in_past() -> String {
    "Esa fecha ya pasó. ¿Para qué otra fecha querés reservar?".to_owned()
}

pub fn ask_time() -> String {
    "¿A qué hora? Por ejemplo 21:00 o 21hs.".to_owned()
}

pub fn time_again() -> String {
    "No entendí el horario. Escribilo entre 00:00 y 23:59, por ejemplo 20:30.".to_owned()
}

pub fn ask_party_size() -> String {
    "¿Para cuántas personas?".to_owned()
}

pub fn party_size_again() -> String {
    "Necesito un número de personas mayor a cero, por ejemplo 4.".to_owned()
}

pub fn confirm_booking(date: NaiveDate, time: NaiveTime, party_size: u32) -> String {
    format!(
        "Te confirmo: {} a las {} para {}. ¿Confirmás? Respondé \"si\" para confirmar.",
        display_date(date),
        format_time(time),
        people(party_size)
    )
}

pub fn booking_confirmed(reservation: &Reservation) -> String {
    format!(
        "¡Listo! Tu reserva quedó confirmada.\n{}\n\nGuardá el código para modificarla o \
         cancelarla. ¡Te esperamos!",
        details(reservation)
    )
}

pub fn conflict(reason: RejectionReason) -> String {
    let cause = match reason {
        RejectionReason::DuplicateBooking => "Ya tenés una reserva para ese día y horario.",
        RejectionReason::NoSuitableTable => "No tenemos mesas para esa cantidad de personas.",
        RejectionReason::TableClassExhausted => "No quedan mesas disponibles para ese horario.",
        RejectionReason::CapacityExceeded => "El salón está completo para ese horario.",
        RejectionReason::InvalidPartySize => "La cantidad de personas no es válida.",
    };
    format!("{cause}\n\n1. Elegir otra fecha u horario\n2. Volver al menú")
}

pub fn could_not_complete() -> String {
    "No pudimos completar la operación. Probá responder \"si\" de nuevo en unos minutos."
        .to_owned()
}

pub fn temporary_failure() -> String {
    "Tuvimos un problema procesando tu mensaje. Probá de nuevo en unos minutos.".to_owned()
}

pub fn ask_modify_code() -> String {
    "Decime el código de la reserva que querés modificar (por ejemplo RC-26-0312-0001)."
        .to_owned()
}

pub fn ask_cancel_code() -> String {
    "Decime el código de la reserva que querés cancelar (por ejemplo RC-26-0312-0001)."
        .to_owned()
}

pub fn code_again() -> String {
    "Ese código no tiene el formato correcto. Se ve así: RC-26-0312-0001.".to_owned()
}

pub fn reservation_not_found(code: &ReservationCode) -> String {
    format!("No encontramos una reserva activa con el código {code}. Revisalo y probá de nuevo.")
}

pub fn reservation_gone() -> String {
    format!("Esa reserva ya no está activa.\n\n{MENU}")
}

pub fn modify_start(reservation: &Reservation) -> String {
    format!("Encontramos tu reserva:\n{}\n\n{}", details(reservation), ask_date())
}

pub fn confirm_modify(
    code: &ReservationCode,
    date: NaiveDate,
    time: NaiveTime,
    party_size: u32,
) -> String {
    format!(
        "La reserva {code} pasaría al {} a las {} para {}. ¿Confirmás el cambio? Respondé \
         \"si\" para confirmar.",
        display_date(date),
        format_time(time),
        people(party_size)
    )
}

pub fn reservation_modified(reservation: &Reservation) -> String {
    format!("¡Listo! Actualizamos tu reserva.\n{}", details(reservation))
}

pub fn confirm_cancel(reservation: &Reservation) -> String {
    format!(
        "Vas a cancelar esta reserva:\n{}\n\n¿Confirmás? Respondé \"si\" para cancelarla.",
        details(reservation)
    )
}

pub fn reservation_cancelled(code: &ReservationCode) -> String {
    format!("Cancelamos la reserva {code}.\n\n{MENU}")
}

pub fn upcoming(reservations: &[Reservation]) -> String {
    if reservations.is_empty() {
        return format!("No tenés reservas próximas.\n\n{MENU}");
    }

    let lines: Vec<String> = reservations
        .iter()
        .map(|reservation| {
            format!(
                "• {} - {} {} - {}",
                reservation.code,
                display_date(reservation.date()),
                format_time(reservation.start_time()),
                people(reservation.party_size)
            )
        })
        .collect();
    format!("Tus próximas reservas:\n{}\n\n{MENU}", lines.join("\n"))
}

fn details(reservation: &Reservation) -> String {
    format!(
        "Fecha: {}\nHora: {}\nPersonas: {}\nCódigo: {}",
        display_date(reservation.date()),
        format_time(reservation.start_time()),
        reservation.party_size,
        reservation.code
    )
}

fn people(party_size: u32) -> String {
    if party_size == 1 {
        "1 persona".to_owned()
    } else {
        format!("{party_size} personas")
    }
}
