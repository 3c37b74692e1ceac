use anyhow::{Context, Result};

use crate::services::influx::Point;
use crate::services::tado::{HeatPump, Room, WeatherReport};

/// Weather always carries outside temperature and a weather-state code; the
/// solar intensity block is absent at night and defaults to 0.
pub fn weather_point(home_id: i64, weather: &WeatherReport) -> Result<Point> {
    let solar = weather
        .solar_intensity
        .as_ref()
        .map(|v| v.percentage)
        .unwrap_or(0.0);
    let outside = weather
        .outside_temperature
        .as_ref()
        .context("weather payload missing outsideTemperature")?
        .celsius;
    let state = weather
        .weather_state
        .as_ref()
        .context("weather payload missing weatherState")?
        .value
        .clone();

    Ok(Point::new("weather")
        .tag("homeId", home_id.to_string())
        .field("solarIntensityPercentage", solar)
        .field("outsideTemperature", outside)
        .field("weatherState", state))
}

/// One point per room, carrying only the fields present in the payload.
/// Rooms reporting nothing produce no point.
pub fn room_points(home_id: i64, rooms: &[Room]) -> Vec<Point> {
    let mut points = Vec::new();
    for room in rooms {
        let mut point = Point::new("rooms")
            .tag("homeId", home_id.to_string())
            .tag("roomId", room.id.to_string());
        if let Some(name) = &room.name {
            point = point.tag("roomName", name.clone());
        }

        if let Some(heating_power) = &room.heating_power {
            point = point.field("heatingPowerPercentage", heating_power.percentage);
        }
        if let Some(data_points) = &room.sensor_data_points {
            if let Some(humidity) = &data_points.humidity {
                point = point.field("humidity", humidity.percentage);
            }
            if let Some(temperature) = &data_points.inside_temperature {
                point = point.field("temperature", temperature.value);
            }
        }
        if let Some(temperature) = room.setting.as_ref().and_then(|s| s.temperature.as_ref()) {
            point = point.field("setTemperature", temperature.value);
        }

        if point.has_fields() {
            points.push(point);
        }
    }
    points
}

/// Heat-pump fields are each independently optional; an empty payload
/// produces no point.
pub fn heat_pump_point(home_id: i64, heat_pump: &HeatPump) -> Option<Point> {
    let mut point = Point::new("heat_pump").tag("homeId", home_id.to_string());

    if let Some(temperature) = heat_pump
        .heating
        .as_ref()
        .and_then(|h| h.setting.as_ref())
        .and_then(|s| s.temperature.as_ref())
    {
        point = point.field("heatPumpSetTemperature", temperature.value);
    }

    if let Some(hot_water) = &heat_pump.domestic_hot_water {
        if let Some(current) = hot_water.current_temperature_in_celsius {
            point = point.field("hotWaterCurrentTemperatureInCelsius", current);
        }
        if let Some(setpoint) = hot_water
            .current_block_setpoint
            .as_ref()
            .and_then(|b| b.setpoint_value.as_ref())
            .and_then(|s| parse_setpoint(&s.value))
        {
            point = point.field("hotWaterSetTemperatureInCelsius", setpoint);
        }
    }

    point.has_fields().then_some(point)
}

/// The block setpoint value is text on some firmware and numeric on others.
fn parse_setpoint(value: &serde_json::Value) -> Option<f64> {
    if let Some(number) = value.as_f64() {
        return Some(number);
    }
    value.as_str().and_then(|s| s.trim().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather(payload: serde_json::Value) -> WeatherReport {
        serde_json::from_value(payload).unwrap()
    }

    fn rooms(payload: serde_json::Value) -> Vec<Room> {
        serde_json::from_value(payload).unwrap()
    }

    fn heat_pump(payload: serde_json::Value) -> HeatPump {
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn weather_solar_intensity_defaults_to_zero() {
        let report = weather(json!({
            "outsideTemperature": { "celsius": 9.3 },
            "weatherState": { "value": "NIGHT_CLOUDY" }
        }));
        let line = weather_point(42, &report).unwrap().to_line_protocol().unwrap();
        assert!(line.starts_with("weather,homeId=42 "));
        assert!(line.contains("solarIntensityPercentage=0"));
        assert!(line.contains("outsideTemperature=9.3"));
        assert!(line.contains("weatherState=\"NIGHT_CLOUDY\""));
    }

    #[test]
    fn weather_missing_outside_temperature_is_an_error() {
        let report = weather(json!({
            "weatherState": { "value": "SUN" }
        }));
        let err = weather_point(42, &report).unwrap_err().to_string();
        assert!(err.contains("outsideTemperature"));
    }

    #[test]
    fn room_with_no_readings_yields_no_point() {
        let parsed = rooms(json!([
            { "id": 7, "name": "Hallway" }
        ]));
        assert!(room_points(1, &parsed).is_empty());
    }

    #[test]
    fn room_fields_are_included_only_when_present() {
        let parsed = rooms(json!([
            {
                "id": 7,
                "name": "Living Room",
                "heatingPower": { "percentage": 35.0 },
                "sensorDataPoints": {
                    "humidity": { "percentage": 54.2 },
                    "insideTemperature": { "value": 20.9 }
                },
                "setting": { "temperature": { "value": 21.0 } }
            },
            {
                "id": 8,
                "name": "Attic",
                "sensorDataPoints": {
                    "insideTemperature": { "value": 16.4 }
                }
            }
        ]));
        let points = room_points(1, &parsed);
        assert_eq!(points.len(), 2);

        let first = points[0].to_line_protocol().unwrap();
        assert!(first.contains("roomId=7"));
        assert!(first.contains("roomName=Living\\ Room"));
        assert!(first.contains("heatingPowerPercentage=35"));
        assert!(first.contains("humidity=54.2"));
        assert!(first.contains("temperature=20.9"));
        assert!(first.contains("setTemperature=21"));

        let second = points[1].to_line_protocol().unwrap();
        assert!(second.contains("roomId=8"));
        assert!(second.contains("temperature=16.4"));
        assert!(!second.contains("humidity"));
        assert!(!second.contains("heatingPowerPercentage"));
    }

    #[test]
    fn heat_pump_with_only_hot_water_temperature_has_one_field() {
        let parsed = heat_pump(json!({
            "domesticHotWater": { "currentTemperatureInCelsius": 48.5 }
        }));
        let line = heat_pump_point(1, &parsed)
            .unwrap()
            .to_line_protocol()
            .unwrap();
        assert_eq!(
            line,
            "heat_pump,homeId=1 hotWaterCurrentTemperatureInCelsius=48.5"
        );
    }

    #[test]
    fn heat_pump_setpoint_is_parsed_from_text() {
        let parsed = heat_pump(json!({
            "heating": { "setting": { "temperature": { "value": 45.0 } } },
            "domesticHotWater": {
                "currentBlockSetpoint": { "setpointValue": { "value": "50.0" } }
            }
        }));
        let line = heat_pump_point(1, &parsed)
            .unwrap()
            .to_line_protocol()
            .unwrap();
        assert!(line.contains("heatPumpSetTemperature=45"));
        assert!(line.contains("hotWaterSetTemperatureInCelsius=50"));
    }

    #[test]
    fn heat_pump_unparseable_setpoint_is_omitted() {
        let parsed = heat_pump(json!({
            "domesticHotWater": {
                "currentBlockSetpoint": { "setpointValue": { "value": "auto" } }
            }
        }));
        assert!(heat_pump_point(1, &parsed).is_none());
    }

    #[test]
    fn empty_heat_pump_payload_yields_no_point() {
        let parsed = heat_pump(json!({}));
        assert!(heat_pump_point(1, &parsed).is_none());
    }
}
