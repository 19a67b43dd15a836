use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::AppError;
use crate::geocoding::{DirectionsRoute, Geocoder, RouteLeg};
use crate::models::location::GeoPoint;

#[derive(Default)]
pub struct FixedGeocoder {
    places: DashMap<String, GeoPoint>,
    route_polyline: Option<String>,
}

impl FixedGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(self, address: &str, point: GeoPoint) -> Self {
        self.places.insert(normalize(address), point);
        self
    }

    pub fn with_route_polyline(mut self, encoded: &str) -> Self {
        self.route_polyline = Some(encoded.to_string());
        self
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn geocode(&self, address: &str) -> Result<GeoPoint, AppError> {
        self.places
            .get(&normalize(address))
            .map(|entry| *entry.value())
            .ok_or_else(|| AppError::GeocodingFailed(format!("no result for {address:?}")))
    }

    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<DirectionsRoute, AppError> {
        let encoded_polyline = match &self.route_polyline {
            Some(encoded) => encoded.clone(),
            None => encode_segment(origin, destination),
        };
        let distance_km = crate::geo::haversine_km(origin, destination);

        Ok(DirectionsRoute {
            encoded_polyline,
            legs: vec![RouteLeg {
                distance_meters: (distance_km * 1000.0).round() as u64,
                // 30 km/h city average
                duration_seconds: (distance_km / 30.0 * 3600.0).round() as u64,
            }],
        })
    }
}

fn encode_segment(origin: GeoPoint, destination: GeoPoint) -> String {
    let mut out = String::new();
    let mut previous = (0i64, 0i64);

    for point in [origin, destination] {
        let lat = (point.lat * 1e5).round() as i64;
        let lng = (point.lng * 1e5).round() as i64;
        encode_value(lat - previous.0, &mut out);
        encode_value(lng - previous.1, &mut out);
        previous = (lat, lng);
    }

    out
}

fn encode_value(delta: i64, out: &mut String) {
    let mut value = if delta < 0 { !(delta << 1) } else { delta << 1 };

    while value >= 0x20 {
        out.push(char::from((((value & 0x1f) | 0x20) + 63) as u8));
        value >>= 5;
    }
    out.push(char::from((value + 63) as u8));
}

#[cfg(test)]
mod tests {
    use super::FixedGeocoder;
    use crate::error::AppError;
    use crate::geocoding::Geocoder;
    use crate::models::location::GeoPoint;
    use crate::polyline;

    #[tokio::test]
    async fn lookups_ignore_case_and_padding() {
        let geocoder = FixedGeocoder::new().with_place("Central Station", GeoPoint::new(1.0, 2.0));

        assert_eq!(
            geocoder.geocode("  central station ").await.unwrap(),
            GeoPoint::new(1.0, 2.0)
        );
        assert!(matches!(
            geocoder.geocode("Nowhere").await,
            Err(AppError::GeocodingFailed(_))
        ));
    }

    #[tokio::test]
    async fn straight_route_decodes_back_to_its_endpoints() {
        let geocoder = FixedGeocoder::new();
        let origin = GeoPoint::new(38.5, -120.2);
        let destination = GeoPoint::new(40.7, -120.95);

        let route = geocoder.route(origin, destination).await.unwrap();
        let points = polyline::decode(&route.encoded_polyline).unwrap();

        assert_eq!(route.encoded_polyline, "_p~iF~ps|U_ulLnnqC");
        assert_eq!(points.len(), 2);
        for (point, want) in points.iter().zip([origin, destination]) {
            assert!((point.lat - want.lat).abs() < 1e-9, "{point:?} != {want:?}");
            assert!((point.lng - want.lng).abs() < 1e-9, "{point:?} != {want:?}");
        }
        assert!(route.distance_meters() > 0);
    }
}
