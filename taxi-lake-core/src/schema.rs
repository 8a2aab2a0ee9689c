//! Static BigQuery column layouts for the trip record families that get warehouse tables.

use crate::task::DatasetKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub description: Option<&'static str>,
}

const fn col(name: &'static str, sql_type: &'static str, description: &'static str) -> Column {
    Column {
        name,
        sql_type,
        description: Some(description),
    }
}

const fn bare(name: &'static str, sql_type: &'static str) -> Column {
    Column {
        name,
        sql_type,
        description: None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TripSchema {
    pub kind: DatasetKind,
    pub pickup_column: &'static str,
    pub dropoff_column: &'static str,
    pub columns: &'static [Column],
}

impl TripSchema {
    pub fn for_kind(kind: DatasetKind) -> Option<&'static TripSchema> {
        match kind {
            DatasetKind::Yellow => Some(&YELLOW),
            DatasetKind::Green => Some(&GREEN),
            DatasetKind::Fhv | DatasetKind::Fhvhv => None,
        }
    }

    /// Columns hashed into `unique_row_id`; together they identify a trip.
    pub fn key_columns(&self) -> [&'static str; 5] {
        [
            "VendorID",
            self.pickup_column,
            self.dropoff_column,
            "PULocationID",
            "DOLocationID",
        ]
    }
}

/// Columns the master table carries in front of the trip columns.
pub const LINEAGE_COLUMNS: [Column; 2] = [
    col(
        "unique_row_id",
        "BYTES",
        "A unique identifier for the trip, generated by hashing key trip attributes.",
    ),
    col(
        "filename",
        "STRING",
        "The source filename from which the trip data was loaded.",
    ),
];

const PU_LOCATION: &str = "TLC Taxi Zone in which the taximeter was engaged";
const DO_LOCATION: &str = "TLC Taxi Zone in which the taximeter was disengaged";
const PICKUP: &str = "The date and time when the meter was engaged";
const DROPOFF: &str = "The date and time when the meter was disengaged";
const PASSENGERS: &str =
    "The number of passengers in the vehicle. This is a driver-entered value.";
const DISTANCE: &str = "The elapsed trip distance in miles reported by the taximeter.";
const RATECODE: &str = "The final rate code in effect at the end of the trip. 1= Standard rate 2=JFK 3=Newark 4=Nassau or Westchester 5=Negotiated fare 6=Group ride";
const FARE: &str = "The time-and-distance fare calculated by the meter";
const MTA_TAX: &str =
    "$0.50 MTA tax that is automatically triggered based on the metered rate in use";
const TIP: &str = "Tip amount. This field is automatically populated for credit card tips. Cash tips are not included.";
const TOLLS: &str = "Total amount of all tolls paid in trip.";
const TOTAL: &str = "The total amount charged to passengers. Does not include cash tips.";
const PAYMENT: &str = "A numeric code signifying how the passenger paid for the trip. 1= Credit card 2= Cash 3= No charge 4= Dispute 5= Unknown 6= Voided trip";
const CONGESTION: &str = "Congestion surcharge applied to trips in congested zones";

pub static YELLOW: TripSchema = TripSchema {
    kind: DatasetKind::Yellow,
    pickup_column: "tpep_pickup_datetime",
    dropoff_column: "tpep_dropoff_datetime",
    columns: &[
        col("VendorID", "STRING", "A code indicating the TPEP provider that provided the record. 1= Creative Mobile Technologies, LLC; 2= VeriFone Inc."),
        col("tpep_pickup_datetime", "TIMESTAMP", PICKUP),
        col("tpep_dropoff_datetime", "TIMESTAMP", DROPOFF),
        col("passenger_count", "INTEGER", PASSENGERS),
        col("trip_distance", "NUMERIC", DISTANCE),
        col("RatecodeID", "STRING", RATECODE),
        col("store_and_fwd_flag", "STRING", "This flag indicates whether the trip record was held in vehicle memory before sending to the vendor. TRUE = store and forward trip, FALSE = not a store and forward trip"),
        col("PULocationID", "STRING", PU_LOCATION),
        col("DOLocationID", "STRING", DO_LOCATION),
        col("payment_type", "INTEGER", PAYMENT),
        col("fare_amount", "NUMERIC", FARE),
        col("extra", "NUMERIC", "Miscellaneous extras and surcharges. Currently, this only includes the $0.50 and $1 rush hour and overnight charges"),
        col("mta_tax", "NUMERIC", MTA_TAX),
        col("tip_amount", "NUMERIC", TIP),
        col("tolls_amount", "NUMERIC", TOLLS),
        col("improvement_surcharge", "NUMERIC", "$0.30 improvement surcharge assessed on hailed trips at the flag drop. The improvement surcharge began being levied in 2015."),
        col("total_amount", "NUMERIC", TOTAL),
        col("congestion_surcharge", "NUMERIC", CONGESTION),
    ],
};

pub static GREEN: TripSchema = TripSchema {
    kind: DatasetKind::Green,
    pickup_column: "lpep_pickup_datetime",
    dropoff_column: "lpep_dropoff_datetime",
    columns: &[
        col("VendorID", "STRING", "A code indicating the LPEP provider that provided the record. 1= Creative Mobile Technologies, LLC; 2= VeriFone Inc."),
        col("lpep_pickup_datetime", "TIMESTAMP", PICKUP),
        col("lpep_dropoff_datetime", "TIMESTAMP", DROPOFF),
        col("store_and_fwd_flag", "STRING", "This flag indicates whether the trip record was held in vehicle memory before sending to the vendor"),
        col("RatecodeID", "STRING", RATECODE),
        col("PULocationID", "STRING", PU_LOCATION),
        col("DOLocationID", "STRING", DO_LOCATION),
        col("passenger_count", "INT64", PASSENGERS),
        col("trip_distance", "NUMERIC", DISTANCE),
        col("fare_amount", "NUMERIC", FARE),
        col("extra", "NUMERIC", "Miscellaneous extras and surcharges"),
        col("mta_tax", "NUMERIC", MTA_TAX),
        col("tip_amount", "NUMERIC", TIP),
        col("tolls_amount", "NUMERIC", TOLLS),
        bare("ehail_fee", "NUMERIC"),
        col("improvement_surcharge", "NUMERIC", "$0.30 improvement surcharge assessed on hailed trips at the flag drop."),
        col("total_amount", "NUMERIC", TOTAL),
        col("payment_type", "INTEGER", PAYMENT),
        col("trip_type", "STRING", "A code indicating whether the trip was a street-hail or a dispatch. 1= Street-hail 2= Dispatch"),
        col("congestion_surcharge", "NUMERIC", CONGESTION),
    ],
};
