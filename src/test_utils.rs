use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, VR, dicom_value};
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;

pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
pub const ENHANCED_MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4.1";

pub fn ds(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect())
}

fn sequence(tag: dicom::core::Tag, items: Vec<InMemDicomObject>) -> DataElement<InMemDicomObject> {
    DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
}

fn identifiers(series: &str, instance: &str, class: &str) -> Vec<DataElement<InMemDicomObject>> {
    vec![
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(class)),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(instance)),
        DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series)),
        DataElement::new(tags::ROWS, VR::US, dicom_value!(U16, [4])),
        DataElement::new(tags::COLUMNS, VR::US, dicom_value!(U16, [6])),
    ]
}

/// Axial single-frame MR object with 0.5 mm pixels.
pub fn legacy_object(series: &str, instance: &str, position: [f64; 3]) -> InMemDicomObject {
    let mut elements = identifiers(series, instance, MR_IMAGE_STORAGE);
    elements.extend([
        DataElement::new(tags::IMAGE_POSITION_PATIENT, VR::DS, ds(&position)),
        DataElement::new(
            tags::IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            ds(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
        ),
        DataElement::new(tags::PIXEL_SPACING, VR::DS, ds(&[0.5, 0.5])),
    ]);
    InMemDicomObject::from_element_iter(elements)
}

/// Axial multi-frame MR object with one frame per entry of `zs`.
pub fn enhanced_object(
    series: &str,
    instance: &str,
    zs: &[f64],
    spacing_between_slices: Option<f64>,
) -> InMemDicomObject {
    let mut pixel_measures = vec![DataElement::new(tags::PIXEL_SPACING, VR::DS, ds(&[0.5, 0.5]))];
    if let Some(spacing) = spacing_between_slices {
        pixel_measures.push(DataElement::new(
            tags::SPACING_BETWEEN_SLICES,
            VR::DS,
            ds(&[spacing]),
        ));
    }

    let shared = InMemDicomObject::from_element_iter([
        sequence(
            tags::PLANE_ORIENTATION_SEQUENCE,
            vec![InMemDicomObject::from_element_iter([DataElement::new(
                tags::IMAGE_ORIENTATION_PATIENT,
                VR::DS,
                ds(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            )])],
        ),
        sequence(
            tags::PIXEL_MEASURES_SEQUENCE,
            vec![InMemDicomObject::from_element_iter(pixel_measures)],
        ),
    ]);

    let per_frame = zs
        .iter()
        .map(|z| {
            InMemDicomObject::from_element_iter([sequence(
                tags::PLANE_POSITION_SEQUENCE,
                vec![InMemDicomObject::from_element_iter([DataElement::new(
                    tags::IMAGE_POSITION_PATIENT,
                    VR::DS,
                    ds(&[0.0, 0.0, *z]),
                )])],
            )])
        })
        .collect();

    let mut elements = identifiers(series, instance, ENHANCED_MR_IMAGE_STORAGE);
    elements.extend([
        DataElement::new(
            tags::NUMBER_OF_FRAMES,
            VR::IS,
            PrimitiveValue::from(zs.len().to_string()),
        ),
        sequence(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE, vec![shared]),
        sequence(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE, per_frame),
    ]);
    InMemDicomObject::from_element_iter(elements)
}
